use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const GLB_CONTENT_TYPE: &str = "model/gltf-binary";
pub const GLB_EXTENSION: &str = "glb";

/// Durable object storage holding published assets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` at `key`, returning its public URL.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, StorageError>;

    /// Remove `key`. Returns `false` when nothing was stored there.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Whether `put` replaces an existing object in one step.
    fn replaces_atomically(&self) -> bool {
        false
    }
}

/// Client for S3-compatible object storage (R2, Supabase storage, MinIO).
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
    public_base_url: String,
}

impl S3ObjectStore {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        path_style: bool,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if path_style {
            bucket = bucket.with_path_style();
        }

        Ok(Self {
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, &data, content_type)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match response.status_code() {
            200..=299 => Ok(public_url(&self.public_base_url, key)),
            status => Err(StorageError::Status { status, key: key.to_string() }),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match response.status_code() {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => Err(StorageError::Status { status, key: key.to_string() }),
        }
    }

    fn replaces_atomically(&self) -> bool {
        true
    }
}

/// Filesystem-backed store, served by whatever exposes `public_base_url`.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || write_replacing(&path, &data))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))??;
        Ok(public_url(&self.public_base_url, key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write through a sibling temp file and rename it over `path`.
///
/// Readers see the old object or the new one, never a truncated file. The
/// temp file is removed if anything fails before the rename.
fn write_replacing(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
    std::fs::create_dir_all(parent)?;

    let mut file = tempfile::Builder::new()
        .prefix(".upload-")
        .suffix(".part")
        .tempfile_in(parent)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base, key)
}

/// Final `/`-separated segment of an identifier (`gid://shopify/Product/123` → `123`).
pub fn normalize_identifier(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// `{shop}/{product}[/{variant}].glb`, with identifiers flattened to their last segment.
///
/// A blank shop or an identifier with an empty last segment is an `InvalidKey`.
pub fn storage_key(shop: &str, product_id: &str, variant_id: Option<&str>) -> Result<String, StorageError> {
    let segment = |id: &str| {
        let normalized = normalize_identifier(id);
        if normalized.trim().is_empty() {
            return Err(StorageError::InvalidKey(format!("{}/{}", shop, id)));
        }
        Ok(normalized.to_string())
    };

    if shop.trim().is_empty() {
        return Err(StorageError::InvalidKey(format!("{}/{}", shop, product_id)));
    }

    let mut key = format!("{}/{}", shop, segment(product_id)?);
    if let Some(variant) = variant_id.filter(|v| !v.is_empty()) {
        key.push('/');
        key.push_str(&segment(variant)?);
    }
    key.push('.');
    key.push_str(GLB_EXTENSION);
    Ok(key)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedAsset {
    pub key: String,
    pub url: String,
}

/// Publishes exported assets under a deterministic per-product key.
pub struct StoragePublisher {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl StoragePublisher {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Upload `local_path`, replacing whatever was published for the same product/variant.
    pub async fn publish(
        &self,
        local_path: &Path,
        shop: &str,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> Result<PublishedAsset, PublishError> {
        let key = storage_key(shop, product_id, variant_id).map_err(PublishError::Storage)?;
        let data = tokio::fs::read(local_path).await.map_err(PublishError::Read)?;
        let size = data.len();

        tracing::info!(key = %key, bytes = size, "Publishing model");

        let url = tokio::time::timeout(self.timeout, self.upsert(&key, data))
            .await
            .map_err(|_| PublishError::TimedOut(self.timeout))??;

        tracing::info!(key = %key, url = %url, "Model published");
        Ok(PublishedAsset { key, url })
    }

    async fn upsert(&self, key: &str, data: Vec<u8>) -> Result<String, PublishError> {
        // Stores without atomic overwrite get delete-then-put; the key is briefly absent
        if !self.store.replaces_atomically() {
            match self.store.delete(key).await {
                Ok(existed) => tracing::debug!(key = %key, existed, "Cleared previous model"),
                Err(e) => tracing::debug!(key = %key, error = %e, "Ignoring failed pre-upload delete"),
            }
        }

        self.store
            .put(key, data, GLB_CONTENT_TYPE)
            .await
            .map_err(PublishError::Storage)
    }

    /// Remove the published model. Failures are logged and reported as `false`.
    pub async fn unpublish(&self, shop: &str, product_id: &str, variant_id: Option<&str>) -> bool {
        let key = match storage_key(shop, product_id, variant_id) {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(shop = %shop, product_id = %product_id, error = %e, "Cannot unpublish model");
                return false;
            }
        };
        match self.store.delete(&key).await {
            Ok(existed) => {
                tracing::info!(key = %key, existed, "Model unpublished");
                true
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to unpublish model");
                false
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object storage operation failed: {0}")]
    Backend(String),

    #[error("Object storage returned HTTP {status} for {key}")]
    Status { status: u16, key: String },

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to read exported asset: {0}")]
    Read(std::io::Error),

    #[error("Upload failed: {0}")]
    Storage(StorageError),

    #[error("Upload timed out after {0:?}")]
    TimedOut(Duration),
}
