use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which object store backs the storage publisher.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Local,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job queue
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Base URL of the system of record receiving status webhooks
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// Bucket for generated models
    #[serde(default = "default_s3_bucket")]
    pub s3_bucket: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// S3-compatible endpoint URL (R2, Supabase storage, MinIO, ...)
    pub s3_endpoint: Option<String>,

    pub s3_access_key: Option<String>,

    pub s3_secret_key: Option<String>,

    /// Use path-style bucket addressing
    #[serde(default = "default_true")]
    pub s3_path_style: bool,

    /// Prefix under which uploaded objects are publicly resolvable
    pub storage_public_base_url: Option<String>,

    /// Root directory for the local storage backend
    pub local_storage_dir: Option<PathBuf>,

    /// Base URL of the reconstruction inference server
    #[serde(default = "default_inference_url")]
    pub inference_url: String,

    /// Pretrained model identifier passed to the inference server on load
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Background removal endpoint (rembg-compatible)
    #[serde(default = "default_rembg_url")]
    pub rembg_url: String,

    #[serde(default = "default_true")]
    pub remove_background: bool,

    /// Side length of normalized images, in pixels
    #[serde(default = "default_target_size")]
    pub target_size: u32,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,

    #[serde(default = "default_inference_timeout_secs")]
    pub inference_timeout_secs: u64,

    /// Pipeline deadline after which the job is failed and cleaned up
    #[serde(default = "default_soft_time_limit_secs")]
    pub soft_time_limit_secs: u64,

    /// Deadline after which the worker abandons the job outright
    #[serde(default = "default_hard_time_limit_secs")]
    pub hard_time_limit_secs: u64,

    /// Parent directory for per-job workspaces (system temp dir when unset)
    pub workspace_root: Option<PathBuf>,

    /// Number of concurrent job loops per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_backend_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_s3_bucket() -> String {
    "3d-models".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_inference_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_model_id() -> String {
    "stabilityai/triposr".to_string()
}

fn default_rembg_url() -> String {
    "http://localhost:7000/api/remove".to_string()
}

fn default_true() -> bool {
    true
}

fn default_target_size() -> u32 {
    512
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_upload_timeout_secs() -> u64 {
    120
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_inference_timeout_secs() -> u64 {
    900
}

fn default_soft_time_limit_secs() -> u64 {
    1500
}

fn default_hard_time_limit_secs() -> u64 {
    1800
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: AppConfig = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_time_limit_secs == 0 || self.soft_time_limit_secs >= self.hard_time_limit_secs {
            return Err(ConfigError::Invalid(format!(
                "SOFT_TIME_LIMIT_SECS ({}) must be non-zero and below HARD_TIME_LIMIT_SECS ({})",
                self.soft_time_limit_secs, self.hard_time_limit_secs
            )));
        }

        if self.target_size == 0 {
            return Err(ConfigError::Invalid("TARGET_SIZE must be positive".into()));
        }

        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid("WORKER_CONCURRENCY must be positive".into()));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_endpoint.is_none()
                    || self.s3_access_key.is_none()
                    || self.s3_secret_key.is_none()
                {
                    return Err(ConfigError::Invalid(
                        "S3 storage requires S3_ENDPOINT, S3_ACCESS_KEY and S3_SECRET_KEY".into(),
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_dir.is_none() || self.storage_public_base_url.is_none() {
                    return Err(ConfigError::Invalid(
                        "Local storage requires LOCAL_STORAGE_DIR and STORAGE_PUBLIC_BASE_URL".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Public URL prefix for stored objects; defaults to `{endpoint}/{bucket}` on S3.
    pub fn public_base_url(&self) -> Option<String> {
        self.storage_public_base_url.clone().or_else(|| {
            self.s3_endpoint
                .as_ref()
                .map(|endpoint| format!("{}/{}", endpoint.trim_end_matches('/'), self.s3_bucket))
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }

    pub fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
