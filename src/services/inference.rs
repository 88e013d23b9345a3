use async_trait::async_trait;
use base64::Engine;
use image::RgbImage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use crate::models::mesh::Mesh;
use crate::services::reconstruction::{Device, ModelLoader, ReconstructionError, ReconstructionModel};

/// Client for the HTTP inference server hosting the single-view reconstruction model.
pub struct InferenceServerClient {
    http: Client,
    base_url: String,
    model_id: String,
}

#[derive(Deserialize)]
struct DevicesResponse {
    devices: Vec<String>,
}

#[derive(Serialize)]
struct LoadRequest<'a> {
    model: &'a str,
    device: String,
}

#[derive(Serialize)]
struct ReconstructRequest<'a> {
    model: &'a str,
    device: String,
    image: String,
    resolution: u32,
    has_vertex_color: bool,
}

#[derive(Serialize)]
struct ReleaseRequest {
    device: String,
}

impl InferenceServerClient {
    pub fn new(base_url: &str, model_id: &str, timeout: Duration) -> Result<Self, ReconstructionError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ReconstructionError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ReconstructionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ReconstructionError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ModelLoader for InferenceServerClient {
    async fn available_devices(&self) -> Result<Vec<Device>, ReconstructionError> {
        let url = format!("{}/v1/devices", self.base_url);
        let response = check_status(self.http.get(&url).send().await?).await?;
        let body: DevicesResponse = response.json().await?;

        Ok(body
            .devices
            .iter()
            .filter_map(|name| match name.parse::<Device>() {
                Ok(device) => Some(device),
                Err(_) => {
                    tracing::warn!(device = %name, "Ignoring unsupported compute device");
                    None
                }
            })
            .collect())
    }

    async fn load(&self, device: Device) -> Result<Arc<dyn ReconstructionModel>, ReconstructionError> {
        let url = format!("{}/v1/models/load", self.base_url);
        check_status(
            self.http
                .post(&url)
                .json(&LoadRequest {
                    model: &self.model_id,
                    device: device.to_string(),
                })
                .send()
                .await?,
        )
        .await?;

        Ok(Arc::new(RemoteModel {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            model_id: self.model_id.clone(),
            device,
        }))
    }
}

/// A model resident on the inference server.
pub struct RemoteModel {
    http: Client,
    base_url: String,
    model_id: String,
    device: Device,
}

#[async_trait]
impl ReconstructionModel for RemoteModel {
    async fn infer(&self, image: &RgbImage, resolution: u32) -> Result<Mesh, ReconstructionError> {
        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, image::ImageFormat::Png)?;

        let url = format!("{}/v1/reconstruct", self.base_url);
        let request = ReconstructRequest {
            model: &self.model_id,
            device: self.device.to_string(),
            image: base64::engine::general_purpose::STANDARD.encode(png.into_inner()),
            resolution,
            has_vertex_color: true,
        };

        let response = check_status(self.http.post(&url).json(&request).send().await?).await?;
        let mesh: Mesh = response.json().await?;
        Ok(mesh)
    }

    async fn release_memory(&self) {
        let url = format!("{}/v1/memory/release", self.base_url);
        let result = self
            .http
            .post(&url)
            .json(&ReleaseRequest {
                device: self.device.to_string(),
            })
            .send()
            .await
            .and_then(|r| r.error_for_status());

        if let Err(e) = result {
            tracing::warn!(device = %self.device, error = %e, "Failed to release accelerator memory");
        }
    }
}
