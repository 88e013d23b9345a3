//! Single-view 3D reconstruction.
//!
//! [`ReconstructionService`] owns the process-wide model handle. The first
//! call loads the model through a [`ModelLoader`]; if loading fails the
//! handle settles on [`ModelHandle::Unavailable`] and every later call
//! returns the placeholder cube instead of failing the job.

use async_trait::async_trait;
use image::{Rgb, RgbImage, RgbaImage};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::models::job::QualityPreset;
use crate::models::mesh::{Mesh, MeshError};
use crate::services::normalizer::NormalizedImage;

/// Compute device, declared in ascending priority order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Device {
    Cpu,
    Mps,
    Cuda,
}

/// Highest-priority device available, falling back to the CPU.
pub fn select_device(available: &[Device]) -> Device {
    available.iter().copied().max().unwrap_or(Device::Cpu)
}

/// A loaded reconstruction model.
#[async_trait]
pub trait ReconstructionModel: Send + Sync {
    /// Run inference on one RGB view and extract a mesh at `resolution`.
    async fn infer(&self, image: &RgbImage, resolution: u32) -> Result<Mesh, ReconstructionError>;

    /// Free cached accelerator memory. Best effort.
    async fn release_memory(&self);
}

/// Loads the model onto a device.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn available_devices(&self) -> Result<Vec<Device>, ReconstructionError>;

    async fn load(&self, device: Device) -> Result<Arc<dyn ReconstructionModel>, ReconstructionError>;
}

/// Cached outcome of the one-time model load.
#[derive(Clone)]
pub enum ModelHandle {
    Loaded {
        model: Arc<dyn ReconstructionModel>,
        device: Device,
    },
    Unavailable {
        reason: String,
    },
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelHandle::Loaded { device, .. } => f.debug_struct("Loaded").field("device", device).finish(),
            ModelHandle::Unavailable { reason } => {
                f.debug_struct("Unavailable").field("reason", reason).finish()
            }
        }
    }
}

/// Where a reconstructed mesh came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshSource {
    Model(Device),
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub mesh: Mesh,
    pub resolution: u32,
    pub source: MeshSource,
}

impl Reconstruction {
    pub fn is_placeholder(&self) -> bool {
        self.source == MeshSource::Placeholder
    }
}

pub struct ReconstructionService {
    loader: Option<Arc<dyn ModelLoader>>,
    handle: OnceCell<ModelHandle>,
}

impl ReconstructionService {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader: Some(loader),
            handle: OnceCell::new(),
        }
    }

    /// Service pinned to placeholder mode, for environments without a model.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            loader: None,
            handle: OnceCell::new_with(Some(ModelHandle::Unavailable {
                reason: reason.into(),
            })),
        }
    }

    /// Load the model on first use. Concurrent callers wait on the same load.
    pub async fn handle(&self) -> &ModelHandle {
        self.handle.get_or_init(|| self.load_handle()).await
    }

    async fn load_handle(&self) -> ModelHandle {
        let Some(loader) = &self.loader else {
            return ModelHandle::Unavailable {
                reason: "no model loader configured".to_string(),
            };
        };

        let device = match loader.available_devices().await {
            Ok(devices) => select_device(&devices),
            Err(e) => {
                tracing::warn!(error = %e, "Device discovery failed, assuming CPU");
                Device::Cpu
            }
        };

        tracing::info!(device = %device, "Loading reconstruction model");

        match loader.load(device).await {
            Ok(model) => {
                tracing::info!(device = %device, "Reconstruction model loaded");
                ModelHandle::Loaded { model, device }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load reconstruction model, falling back to placeholder mode");
                ModelHandle::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Reconstruct a mesh from the first normalized image.
    ///
    /// Extra images are accepted but unused: the model is single-view.
    pub async fn reconstruct(
        &self,
        images: &[NormalizedImage],
        quality: QualityPreset,
    ) -> Result<Reconstruction, ReconstructionError> {
        let first = images.first().ok_or(ReconstructionError::NoInput)?;
        let resolution = quality.mesh_resolution();

        if images.len() > 1 {
            tracing::info!(images = images.len(), "Using first image for single-view reconstruction");
        }

        match self.handle().await {
            ModelHandle::Unavailable { reason } => {
                metrics::counter!("reconstruction_placeholder_total").increment(1);
                tracing::warn!(
                    reason = %reason,
                    resolution,
                    "Reconstruction model unavailable, emitting placeholder mesh"
                );
                Ok(Reconstruction {
                    mesh: Mesh::placeholder_cube(),
                    resolution,
                    source: MeshSource::Placeholder,
                })
            }
            ModelHandle::Loaded { model, device } => {
                let input = flatten_on_white(&first.pixels);

                model.release_memory().await;
                let guard = ReleaseOnDrop::new(model.clone());
                let start = std::time::Instant::now();
                let result = model.infer(&input, resolution).await;
                guard.release().await;

                let mesh = result?;
                mesh.validate()?;

                tracing::info!(
                    device = %device,
                    resolution,
                    vertices = mesh.vertex_count(),
                    faces = mesh.face_count(),
                    inference_ms = start.elapsed().as_millis() as u64,
                    "Mesh reconstructed"
                );

                Ok(Reconstruction {
                    mesh,
                    resolution,
                    source: MeshSource::Model(*device),
                })
            }
        }
    }
}

/// Releases accelerator memory after inference, even when the inference
/// future is dropped by a deadline before it finishes.
struct ReleaseOnDrop {
    model: Option<Arc<dyn ReconstructionModel>>,
}

impl ReleaseOnDrop {
    fn new(model: Arc<dyn ReconstructionModel>) -> Self {
        Self { model: Some(model) }
    }

    async fn release(mut self) {
        if let Some(model) = self.model.take() {
            model.release_memory().await;
        }
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some(model) = self.model.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!("Inference cancelled, releasing accelerator memory in background");
                runtime.spawn(async move { model.release_memory().await });
            }
            Err(_) => tracing::warn!("Inference cancelled outside a runtime, memory not released"),
        }
    }
}

/// Composite an RGBA image over a white background.
pub fn flatten_on_white(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ReconstructionError {
    #[error("No images provided for reconstruction")]
    NoInput,

    #[error("Inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Inference input could not be encoded: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Model produced an invalid mesh: {0}")]
    InvalidMesh(#[from] MeshError),
}
