//! Job state machine: received → processing → completed | failed.
//!
//! [`JobOrchestrator::run`] is the single place that decides a job's terminal
//! status. Every exit path emits exactly one terminal report and removes the
//! job workspace.

use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::job::{JobRequest, JobStatus, QualityPreset};
use crate::models::report::{Checkpoint, StatusReport};
use crate::services::exporter::{self, ExportError};
use crate::services::normalizer::{ImageNormalizer, NoUsableImagesError};
use crate::services::reconstruction::{ReconstructionError, ReconstructionService};
use crate::services::reporter::StatusReporter;
use crate::services::storage::{PublishError, StoragePublisher};
use crate::services::workspace::Workspace;

const ASSET_FILE_NAME: &str = "model.glb";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub target_size: u32,
    pub remove_background: bool,
    pub workspace_root: Option<PathBuf>,
    pub soft_time_limit: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            target_size: 512,
            remove_background: true,
            workspace_root: None,
            soft_time_limit: None,
        }
    }
}

/// Result of a successful job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub model_url: String,
    pub storage_key: String,
    pub quality: QualityPreset,
    pub mesh_resolution: u32,
    pub images_processed: usize,
    pub images_requested: usize,
    pub placeholder_mesh: bool,
}

impl JobOutcome {
    /// Report metadata: caller metadata first, pipeline values on top.
    fn metadata(&self, job: &JobRequest) -> Map<String, Value> {
        let mut metadata = job.payload.metadata.clone();
        metadata.insert("quality".into(), self.quality.as_ref().into());
        metadata.insert("mesh_resolution".into(), self.mesh_resolution.into());
        metadata.insert("images_processed".into(), self.images_processed.into());
        metadata.insert("images_requested".into(), self.images_requested.into());
        metadata.insert("placeholder_mesh".into(), self.placeholder_mesh.into());
        metadata.insert("storage_key".into(), self.storage_key.clone().into());
        if let Some(handle) = &job.payload.product_handle {
            metadata.insert("product_handle".into(), handle.clone().into());
        }
        metadata
    }
}

/// Closed set of job-level failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    NoUsableImagesError,
    WorkspaceError,
    ReconstructionError,
    ExportError,
    PublishError,
    TimedOutError,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error(transparent)]
    NoUsableImages(#[from] NoUsableImagesError),

    #[error("Failed to create job workspace: {0}")]
    Workspace(std::io::Error),

    #[error("3D generation failed: {0}")]
    Reconstruction(#[from] ReconstructionError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Job exceeded its soft time limit of {0:?}")]
    TimedOut(Duration),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::ValidationError,
            PipelineError::NoUsableImages(_) => ErrorKind::NoUsableImagesError,
            PipelineError::Workspace(_) => ErrorKind::WorkspaceError,
            PipelineError::Reconstruction(_) => ErrorKind::ReconstructionError,
            PipelineError::Export(_) => ErrorKind::ExportError,
            PipelineError::Publish(_) => ErrorKind::PublishError,
            PipelineError::TimedOut(_) => ErrorKind::TimedOutError,
        }
    }

    /// Whether running the same job again could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::Validation(_))
    }
}

/// Progress/status emitter for one job run.
///
/// Enforces the report ordering: progress never decreases and at most one
/// terminal report is sent. Delivery failures are logged and swallowed.
pub struct JobProgress {
    job_id: String,
    reporter: Arc<dyn StatusReporter>,
    status: JobStatus,
    progress: u8,
}

impl JobProgress {
    pub fn new(job_id: &str, reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            job_id: job_id.to_string(),
            reporter,
            status: JobStatus::Pending,
            progress: 0,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub async fn checkpoint(&mut self, checkpoint: Checkpoint) {
        if self.status.is_terminal() {
            tracing::warn!(job_id = %self.job_id, checkpoint = %checkpoint, "Ignoring checkpoint after terminal status");
            return;
        }

        let progress = checkpoint.progress();
        if progress < self.progress {
            tracing::warn!(
                job_id = %self.job_id,
                checkpoint = %checkpoint,
                current = self.progress,
                "Ignoring out-of-order checkpoint"
            );
            return;
        }

        self.status = JobStatus::Processing;
        self.progress = progress;
        tracing::info!(job_id = %self.job_id, checkpoint = %checkpoint, progress, "Job progress");
        self.send(StatusReport::processing(&self.job_id, checkpoint)).await;
    }

    pub async fn complete(&mut self, model_url: String, metadata: Map<String, Value>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Completed;
        self.progress = Checkpoint::Completed.progress();
        self.send(StatusReport::completed(&self.job_id, model_url, metadata)).await;
    }

    pub async fn fail(&mut self, error: &PipelineError, mut metadata: Map<String, Value>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        metadata.insert("error_kind".into(), error.kind().as_ref().into());
        self.send(StatusReport::failed(&self.job_id, error.to_string(), metadata)).await;
    }

    async fn send(&self, report: StatusReport) {
        if let Err(e) = self.reporter.report(&report).await {
            tracing::warn!(
                job_id = %self.job_id,
                status = %report.status,
                error = %e,
                "Failed to deliver status report"
            );
        }
    }
}

/// Runs jobs through normalize → reconstruct → export → publish.
pub struct JobOrchestrator {
    normalizer: ImageNormalizer,
    reconstruction: Arc<ReconstructionService>,
    publisher: StoragePublisher,
    reporter: Arc<dyn StatusReporter>,
    settings: PipelineSettings,
}

impl JobOrchestrator {
    pub fn new(
        normalizer: ImageNormalizer,
        reconstruction: Arc<ReconstructionService>,
        publisher: StoragePublisher,
        reporter: Arc<dyn StatusReporter>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            normalizer,
            reconstruction,
            publisher,
            reporter,
            settings,
        }
    }

    pub fn publisher(&self) -> &StoragePublisher {
        &self.publisher
    }

    /// Execute one job end to end.
    ///
    /// Emits one terminal report and returns the error again on failure so
    /// the caller's queue policy can act on it.
    pub async fn run(&self, job: &JobRequest) -> Result<JobOutcome, PipelineError> {
        let start = Instant::now();
        let mut progress = JobProgress::new(&job.job_id, self.reporter.clone());
        metrics::counter!("model_jobs_total").increment(1);

        tracing::info!(
            job_id = %job.job_id,
            shop = %job.payload.shop,
            product_id = %job.payload.product_id,
            images = job.payload.image_urls.len(),
            quality = %job.payload.quality,
            "Processing model generation job"
        );

        let result = match job.check() {
            Ok(()) => self.execute_with_deadline(job, &mut progress).await,
            Err(message) => Err(PipelineError::Validation(message)),
        };

        metrics::histogram!("model_job_duration_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => {
                progress.complete(outcome.model_url.clone(), outcome.metadata(job)).await;
                metrics::counter!("model_jobs_completed").increment(1);
                tracing::info!(
                    job_id = %job.job_id,
                    model_url = %outcome.model_url,
                    placeholder = outcome.placeholder_mesh,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                progress.fail(&e, job.payload.metadata.clone()).await;
                metrics::counter!("model_jobs_failed", "kind" => e.kind().to_string()).increment(1);
                tracing::error!(job_id = %job.job_id, kind = %e.kind(), error = %e, "Job failed");
                Err(e)
            }
        }
    }

    /// Fail a job whose message could not be decoded into a request.
    ///
    /// Nothing is executed; the job only receives its terminal `failed` report.
    pub async fn reject(&self, job_id: &str, reason: &str) -> PipelineError {
        let error = PipelineError::Validation(format!("Undecodable job message: {}", reason));
        let mut progress = JobProgress::new(job_id, self.reporter.clone());
        metrics::counter!("model_jobs_total").increment(1);
        progress.fail(&error, Map::new()).await;
        metrics::counter!("model_jobs_failed", "kind" => error.kind().to_string()).increment(1);
        tracing::error!(job_id = %job_id, kind = %error.kind(), error = %error, "Job rejected");
        error
    }

    async fn execute_with_deadline(
        &self,
        job: &JobRequest,
        progress: &mut JobProgress,
    ) -> Result<JobOutcome, PipelineError> {
        match self.settings.soft_time_limit {
            // Dropping the pipeline future on timeout drops the workspace, which removes it
            Some(limit) => tokio::time::timeout(limit, self.execute(job, progress))
                .await
                .map_err(|_| PipelineError::TimedOut(limit))?,
            None => self.execute(job, progress).await,
        }
    }

    async fn execute(&self, job: &JobRequest, progress: &mut JobProgress) -> Result<JobOutcome, PipelineError> {
        let workspace = Workspace::acquire(&job.job_id, self.settings.workspace_root.as_deref())
            .map_err(PipelineError::Workspace)?;

        tracing::debug!(job_id = %job.job_id, path = %workspace.path().display(), "Workspace acquired");

        let result = self.run_stages(job, &workspace, progress).await;
        workspace.close();
        result
    }

    async fn run_stages(
        &self,
        job: &JobRequest,
        workspace: &Workspace,
        progress: &mut JobProgress,
    ) -> Result<JobOutcome, PipelineError> {
        let payload = &job.payload;
        progress.checkpoint(Checkpoint::Received).await;

        progress.checkpoint(Checkpoint::PreprocessingStarted).await;
        let images = self
            .normalizer
            .normalize_all(
                &payload.image_urls,
                self.settings.target_size,
                self.settings.remove_background,
            )
            .await?;
        progress.checkpoint(Checkpoint::PreprocessingDone).await;

        progress.checkpoint(Checkpoint::GenerationStarted).await;
        let reconstruction = self.reconstruction.reconstruct(&images, payload.quality).await?;
        let placeholder_mesh = reconstruction.is_placeholder();
        let mesh_resolution = reconstruction.resolution;

        let asset_path = workspace.file(ASSET_FILE_NAME);
        let export_path = asset_path.clone();
        let mesh = reconstruction.mesh;
        tokio::task::spawn_blocking(move || exporter::export_glb(&mesh, &export_path))
            .await
            .map_err(|e| ExportError::Task(e.to_string()))??;
        progress.checkpoint(Checkpoint::GenerationDone).await;

        progress.checkpoint(Checkpoint::UploadStarted).await;
        let published = self
            .publisher
            .publish(
                &asset_path,
                &payload.shop,
                &payload.product_id,
                payload.variant_id.as_deref(),
            )
            .await?;
        progress.checkpoint(Checkpoint::UploadDone).await;

        Ok(JobOutcome {
            model_url: published.url,
            storage_key: published.key,
            quality: payload.quality,
            mesh_resolution,
            images_processed: images.len(),
            images_requested: payload.image_urls.len(),
            placeholder_mesh,
        })
    }
}
