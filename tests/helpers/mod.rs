//! Test doubles for the pipeline's external collaborators

use async_trait::async_trait;
use image::{RgbImage, RgbaImage};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use model3d_worker::models::job::JobStatus;
use model3d_worker::models::mesh::Mesh;
use model3d_worker::models::report::StatusReport;
use model3d_worker::services::background::{BackgroundRemover, SegmentationError};
use model3d_worker::services::normalizer::ImageNormalizer;
use model3d_worker::services::orchestrator::{JobOrchestrator, PipelineSettings};
use model3d_worker::services::reconstruction::{
    Device, ModelLoader, ReconstructionError, ReconstructionModel, ReconstructionService,
};
use model3d_worker::services::reporter::{ReportingError, StatusReporter};
use model3d_worker::services::storage::{ObjectStore, StorageError, StoragePublisher};

/// Captures every status report in order
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<StatusReport>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn terminal_reports(&self) -> Vec<StatusReport> {
        self.reports()
            .into_iter()
            .filter(|r| r.status.is_terminal())
            .collect()
    }

    /// Progress values of the processing reports, in emission order
    pub fn processing_progress(&self) -> Vec<u8> {
        self.reports()
            .iter()
            .filter(|r| r.status == JobStatus::Processing)
            .filter_map(|r| r.progress)
            .collect()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(&self, report: &StatusReport) -> Result<(), ReportingError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// In-memory object store with non-atomic replace semantics
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    log: Mutex<Vec<String>>,
    pub fail_puts: bool,
}

impl MemoryObjectStore {
    pub fn failing() -> Self {
        Self {
            fail_puts: true,
            ..Default::default()
        }
    }

    pub fn objects(&self) -> HashMap<String, Vec<u8>> {
        self.objects.lock().unwrap().clone()
    }

    /// Operations in order, e.g. `delete:acme.test/1.glb`, `put:acme.test/1.glb`
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn put_count(&self) -> usize {
        self.log().iter().filter(|op| op.starts_with("put:")).count()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        assert_eq!(content_type, "model/gltf-binary");
        self.log.lock().unwrap().push(format!("put:{}", key));
        if self.fail_puts {
            return Err(StorageError::Status {
                status: 503,
                key: key.to_string(),
            });
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(format!("https://cdn.example.com/models/{}", key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.log.lock().unwrap().push(format!("delete:{}", key));
        Ok(self.objects.lock().unwrap().remove(key).is_some())
    }
}

/// Background remover that returns its input untouched
pub struct PassthroughRemover;

#[async_trait]
impl BackgroundRemover for PassthroughRemover {
    async fn remove_background(&self, image: RgbaImage) -> Result<RgbaImage, SegmentationError> {
        Ok(image)
    }
}

/// Background remover whose service is always down
pub struct BrokenRemover;

#[async_trait]
impl BackgroundRemover for BrokenRemover {
    async fn remove_background(&self, _image: RgbaImage) -> Result<RgbaImage, SegmentationError> {
        Err(SegmentationError::Status(503))
    }
}

/// Loader handing out a model that returns a fixed mesh
pub struct FixedMeshLoader {
    pub mesh: Mesh,
    pub inference_delay: Duration,
    pub loads: AtomicUsize,
    pub inferences: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
    pub resolutions: Arc<Mutex<Vec<u32>>>,
    pub fail_inference: bool,
}

impl FixedMeshLoader {
    pub fn new(mesh: Mesh) -> Self {
        Self {
            mesh,
            inference_delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
            inferences: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
            resolutions: Arc::new(Mutex::new(Vec::new())),
            fail_inference: false,
        }
    }

    /// Loads fine, but every inference call errors out
    pub fn failing() -> Self {
        Self {
            fail_inference: true,
            ..Self::new(triangle())
        }
    }

    pub fn slow(mesh: Mesh, delay: Duration) -> Self {
        Self {
            inference_delay: delay,
            ..Self::new(mesh)
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn inference_count(&self) -> usize {
        self.inferences.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

struct FixedMeshModel {
    mesh: Mesh,
    delay: Duration,
    inferences: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    resolutions: Arc<Mutex<Vec<u32>>>,
    fail: bool,
}

#[async_trait]
impl ReconstructionModel for FixedMeshModel {
    async fn infer(&self, image: &RgbImage, resolution: u32) -> Result<Mesh, ReconstructionError> {
        assert_eq!(image.width(), image.height());
        self.inferences.fetch_add(1, Ordering::SeqCst);
        self.resolutions.lock().unwrap().push(resolution);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ReconstructionError::Status {
                status: 500,
                body: "CUDA out of memory".to_string(),
            });
        }
        Ok(self.mesh.clone())
    }

    async fn release_memory(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelLoader for FixedMeshLoader {
    async fn available_devices(&self) -> Result<Vec<Device>, ReconstructionError> {
        Ok(vec![Device::Cpu])
    }

    async fn load(&self, _device: Device) -> Result<Arc<dyn ReconstructionModel>, ReconstructionError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FixedMeshModel {
            mesh: self.mesh.clone(),
            delay: self.inference_delay,
            inferences: self.inferences.clone(),
            releases: self.releases.clone(),
            resolutions: self.resolutions.clone(),
            fail: self.fail_inference,
        }))
    }
}

pub fn triangle() -> Mesh {
    Mesh {
        vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        faces: vec![[0, 1, 2]],
        vertex_colors: Some(vec![[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]]),
    }
}

/// Everything a pipeline test needs to inspect after a run
pub struct Harness {
    pub orchestrator: JobOrchestrator,
    pub reporter: Arc<RecordingReporter>,
    pub store: Arc<MemoryObjectStore>,
    pub workspace_root: tempfile::TempDir,
}

pub struct HarnessBuilder {
    remover: Arc<dyn BackgroundRemover>,
    reconstruction: Arc<ReconstructionService>,
    store: Arc<MemoryObjectStore>,
    reporter: Option<Arc<dyn StatusReporter>>,
    remove_background: bool,
    soft_time_limit: Option<Duration>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            remover: Arc::new(PassthroughRemover),
            reconstruction: Arc::new(ReconstructionService::unavailable("test")),
            store: Arc::new(MemoryObjectStore::default()),
            reporter: None,
            remove_background: true,
            soft_time_limit: None,
        }
    }

    pub fn remover(mut self, remover: Arc<dyn BackgroundRemover>) -> Self {
        self.remover = remover;
        self
    }

    pub fn loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.reconstruction = Arc::new(ReconstructionService::new(loader));
        self
    }

    pub fn store(mut self, store: MemoryObjectStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn remove_background(mut self, enabled: bool) -> Self {
        self.remove_background = enabled;
        self
    }

    pub fn soft_time_limit(mut self, limit: Duration) -> Self {
        self.soft_time_limit = Some(limit);
        self
    }

    pub fn build(self) -> Harness {
        let recording = Arc::new(RecordingReporter::default());
        let reporter = self
            .reporter
            .unwrap_or_else(|| recording.clone() as Arc<dyn StatusReporter>);
        let workspace_root = tempfile::tempdir().unwrap();

        let normalizer = ImageNormalizer::new(self.remover, Duration::from_secs(5)).unwrap();
        let publisher = StoragePublisher::new(self.store.clone(), Duration::from_secs(5));

        let orchestrator = JobOrchestrator::new(
            normalizer,
            self.reconstruction,
            publisher,
            reporter,
            PipelineSettings {
                target_size: 64,
                remove_background: self.remove_background,
                workspace_root: Some(workspace_root.path().to_path_buf()),
                soft_time_limit: self.soft_time_limit,
            },
        );

        Harness {
            orchestrator,
            reporter: recording,
            store: self.store,
            workspace_root,
        }
    }
}

impl Harness {
    /// Number of job workspaces still present on disk
    pub fn leftover_workspaces(&self) -> usize {
        count_entries(self.workspace_root.path())
    }
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
