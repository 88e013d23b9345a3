use model3d_worker::{
    config::{AppConfig, StorageBackend},
    observability,
    services::{
        background::RembgClient,
        inference::InferenceServerClient,
        normalizer::ImageNormalizer,
        orchestrator::{JobOrchestrator, PipelineSettings},
        queue::{Delivery, JobQueue},
        reconstruction::ReconstructionService,
        reporter::WebhookReporter,
        storage::{LocalObjectStore, ObjectStore, S3ObjectStore, StoragePublisher},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    observability::init_tracing();

    tracing::info!("Starting model generation worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    observability::describe_metrics();

    tracing::info!("Initializing services");
    let store: Arc<dyn ObjectStore> = match config.storage_backend {
        StorageBackend::S3 => Arc::new(
            S3ObjectStore::new(
                &config.s3_bucket,
                &config.s3_region,
                config.s3_endpoint.as_deref().unwrap_or_default(),
                config.s3_access_key.as_deref().unwrap_or_default(),
                config.s3_secret_key.as_deref().unwrap_or_default(),
                config.s3_path_style,
                &config.public_base_url().unwrap_or_default(),
            )
            .expect("Failed to initialize S3 storage"),
        ),
        StorageBackend::Local => Arc::new(LocalObjectStore::new(
            config.local_storage_dir.clone().unwrap_or_default(),
            &config.public_base_url().unwrap_or_default(),
        )),
    };
    let publisher = StoragePublisher::new(store, config.upload_timeout());

    let remover = RembgClient::new(&config.rembg_url, config.fetch_timeout())
        .expect("Failed to initialize background removal client");
    let normalizer = ImageNormalizer::new(Arc::new(remover), config.fetch_timeout())
        .expect("Failed to initialize image normalizer");

    let loader = InferenceServerClient::new(&config.inference_url, &config.model_id, config.inference_timeout())
        .expect("Failed to initialize inference client");
    let reconstruction = Arc::new(ReconstructionService::new(Arc::new(loader)));

    let reporter = WebhookReporter::new(&config.backend_url, config.webhook_timeout())
        .expect("Failed to initialize status webhook client");

    let orchestrator = Arc::new(JobOrchestrator::new(
        normalizer,
        reconstruction,
        publisher,
        Arc::new(reporter),
        PipelineSettings {
            target_size: config.target_size,
            remove_background: config.remove_background,
            workspace_root: config.workspace_root.clone(),
            soft_time_limit: Some(config.soft_time_limit()),
        },
    ));

    let queue = Arc::new(JobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));

    tracing::info!(
        concurrency = config.worker_concurrency,
        "Worker ready, starting job processing loops"
    );

    let mut loops = Vec::with_capacity(config.worker_concurrency);
    for slot in 0..config.worker_concurrency {
        let queue = queue.clone();
        let orchestrator = orchestrator.clone();
        let hard_limit = config.hard_time_limit();
        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        loops.push(tokio::spawn(async move {
            run_loop(slot, &queue, &orchestrator, hard_limit, poll_interval).await;
        }));
    }

    // Keep the recorder alive; the worker has no HTTP surface of its own
    let _prometheus_handle = prometheus_handle;
    for handle in loops {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker loop terminated");
        }
    }
}

async fn run_loop(
    slot: usize,
    queue: &JobQueue,
    orchestrator: &JobOrchestrator,
    hard_limit: Duration,
    poll_interval: Duration,
) {
    loop {
        match process_next_job(queue, orchestrator, hard_limit).await {
            Ok(true) => {
                tracing::debug!(slot, "Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!(slot, "No jobs available, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(slot, error = %e, "Error talking to job queue, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was handled, Ok(false) if none was available.
async fn process_next_job(
    queue: &JobQueue,
    orchestrator: &JobOrchestrator,
    hard_limit: Duration,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let delivery: Delivery = match queue.dequeue().await? {
        Some(d) => d,
        None => return Ok(false),
    };

    let job = match &delivery.job {
        Ok(job) => job,
        Err(e) => {
            let message = match delivery.envelope_job_id() {
                Some(job_id) => {
                    let error = orchestrator.reject(&job_id, e).await;
                    format!("{}: {}", error.kind(), error)
                }
                None => {
                    tracing::error!(error = %e, "Discarding undecodable job message without a job id");
                    format!("Undecodable job message: {}", e)
                }
            };
            queue.fail(&delivery, &message).await?;
            return Ok(true);
        }
    };

    let job_id = job.request.job_id.clone();
    tracing::info!(job_id = %job_id, enqueued_at = %job.enqueued_at, "Dequeued job");

    match tokio::time::timeout(hard_limit, orchestrator.run(&job.request)).await {
        Ok(Ok(_)) => {
            queue.complete(&delivery).await?;
        }
        Ok(Err(e)) => {
            // Failure already reported; hand the job to the dead-letter list
            queue.fail(&delivery, &format!("{}: {}", e.kind(), e)).await?;
            tracing::warn!(job_id = %job_id, retryable = e.is_retryable(), "Job moved to dead-letter list");
        }
        Err(_) => {
            tracing::error!(job_id = %job_id, limit = ?hard_limit, "Job exceeded hard time limit, abandoning");
            queue.fail(&delivery, "hard time limit exceeded").await?;
        }
    }

    Ok(true)
}
