use tracing_subscriber::EnvFilter;

/// Initialize structured JSON logging, `info` unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Register descriptions for the application metrics.
pub fn describe_metrics() {
    metrics::describe_counter!("model_jobs_total", "Total model generation jobs started");
    metrics::describe_counter!("model_jobs_completed", "Total model generation jobs completed");
    metrics::describe_counter!(
        "model_jobs_failed",
        "Total model generation jobs that failed, by error kind"
    );
    metrics::describe_histogram!(
        "model_job_duration_seconds",
        "Time to run a model generation job end to end"
    );
    metrics::describe_counter!(
        "normalizer_images_dropped_total",
        "Source images dropped because they could not be fetched or normalized"
    );
    metrics::describe_counter!(
        "reconstruction_placeholder_total",
        "Meshes replaced by the placeholder cube because the model was unavailable"
    );
    metrics::describe_gauge!(
        "model_queue_depth",
        "Current number of pending jobs in the queue"
    );
}
