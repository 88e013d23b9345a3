use async_trait::async_trait;
use image::RgbaImage;
use reqwest::multipart;
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;

/// Removes the background of an image, returning it with a meaningful alpha channel.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn remove_background(&self, image: RgbaImage) -> Result<RgbaImage, SegmentationError>;
}

/// Client for a rembg-compatible HTTP server (`POST` multipart `file`, PNG back).
pub struct RembgClient {
    http: Client,
    endpoint: String,
}

impl RembgClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, SegmentationError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SegmentationError::Http)?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl BackgroundRemover for RembgClient {
    async fn remove_background(&self, image: RgbaImage) -> Result<RgbaImage, SegmentationError> {
        let png = encode_png(&image)?;

        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(png)
                .file_name("image.png")
                .mime_str("image/png")
                .map_err(SegmentationError::Http)?,
        );

        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(SegmentationError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SegmentationError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(SegmentationError::Http)?;
        let output = image::load_from_memory(&body).map_err(SegmentationError::Image)?;
        Ok(output.to_rgba8())
    }
}

pub(crate) fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentationError {
    #[error("Background removal request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Background removal service returned HTTP {0}")]
    Status(u16),

    #[error("Background removal produced an unreadable image: {0}")]
    Image(#[from] image::ImageError),
}
