//! Image normalization: fetch, background removal, foreground crop and resize.
//!
//! Every image that leaves this module is a `target_size × target_size` RGBA
//! buffer with the subject centered on a transparent square canvas.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::services::background::{BackgroundRemover, SegmentationError};

/// Pixels above this alpha (or luminance) value count as foreground.
pub const FOREGROUND_THRESHOLD: u8 = 10;

/// Margin kept around the detected subject, in source pixels.
pub const CROP_PADDING: u32 = 50;

/// A square RGBA image ready for reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pub source_url: String,
    pub pixels: RgbaImage,
}

impl NormalizedImage {
    pub fn size(&self) -> u32 {
        self.pixels.width()
    }
}

/// Which channel decides whether a pixel belongs to the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundMask {
    Alpha,
    Luminance,
}

pub struct ImageNormalizer {
    http: Client,
    remover: Arc<dyn BackgroundRemover>,
}

impl ImageNormalizer {
    pub fn new(remover: Arc<dyn BackgroundRemover>, fetch_timeout: Duration) -> Result<Self, NormalizeError> {
        let http = Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(FetchError::Transport)?;

        Ok(Self { http, remover })
    }

    /// Fetch and normalize a single image.
    pub async fn normalize(
        &self,
        url: &str,
        target_size: u32,
        remove_background: bool,
    ) -> Result<NormalizedImage, NormalizeError> {
        let bytes = self.fetch(url).await?;

        let (rgba, had_alpha) = tokio::task::spawn_blocking(move || {
            let decoded = image::load_from_memory(&bytes)?;
            let had_alpha = decoded.color().has_alpha();
            Ok::<_, image::ImageError>((decoded.to_rgba8(), had_alpha))
        })
        .await
        .map_err(|e| NormalizeError::Task(e.to_string()))?
        .map_err(NormalizeError::Decode)?;

        let (rgba, mask) = if remove_background {
            let cutout = self
                .remover
                .remove_background(rgba)
                .await
                .map_err(NormalizeError::Segmentation)?;
            (cutout, ForegroundMask::Alpha)
        } else if had_alpha {
            (rgba, ForegroundMask::Alpha)
        } else {
            (rgba, ForegroundMask::Luminance)
        };

        let pixels = tokio::task::spawn_blocking(move || {
            center_and_crop(&rgba, target_size, CROP_PADDING, mask)
        })
        .await
        .map_err(|e| NormalizeError::Task(e.to_string()))?;

        tracing::debug!(url = %url, size = target_size, "Image normalized");

        Ok(NormalizedImage {
            source_url: url.to_string(),
            pixels,
        })
    }

    /// Normalize every URL, dropping the ones that fail.
    pub async fn normalize_all(
        &self,
        urls: &[String],
        target_size: u32,
        remove_background: bool,
    ) -> Result<Vec<NormalizedImage>, NoUsableImagesError> {
        let mut images = Vec::with_capacity(urls.len());

        for (index, url) in urls.iter().enumerate() {
            match self.normalize(url, target_size, remove_background).await {
                Ok(image) => images.push(image),
                Err(e) => {
                    metrics::counter!("normalizer_images_dropped_total").increment(1);
                    tracing::warn!(index, url = %url, error = %e, "Dropping image that failed to normalize");
                }
            }
        }

        if images.is_empty() {
            return Err(NoUsableImagesError { attempted: urls.len() });
        }

        tracing::info!(processed = images.len(), requested = urls.len(), "Images normalized");
        Ok(images)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.http.get(url).send().await.map_err(FetchError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(FetchError::Transport)?;
        Ok(body.to_vec())
    }
}

/// Inclusive bounding box `(x_min, y_min, x_max, y_max)` of the foreground.
pub fn foreground_bounds(image: &RgbaImage, mask: ForegroundMask) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for (x, y, pixel) in image.enumerate_pixels() {
        if !is_foreground(pixel, mask) {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    bounds
}

fn is_foreground(pixel: &Rgba<u8>, mask: ForegroundMask) -> bool {
    let [r, g, b, a] = pixel.0;
    match mask {
        ForegroundMask::Alpha => a > FOREGROUND_THRESHOLD,
        ForegroundMask::Luminance => {
            let mean = (r as f32 + g as f32 + b as f32) / 3.0;
            mean > FOREGROUND_THRESHOLD as f32
        }
    }
}

/// Crop to the padded foreground, square it on a transparent canvas and resize.
///
/// An image with no foreground pixels is resized as-is.
pub fn center_and_crop(image: &RgbaImage, target_size: u32, padding: u32, mask: ForegroundMask) -> RgbaImage {
    let Some((x_min, y_min, x_max, y_max)) = foreground_bounds(image, mask) else {
        tracing::warn!("No foreground found in image, resizing original");
        return imageops::resize(image, target_size, target_size, FilterType::Lanczos3);
    };

    let left = x_min.saturating_sub(padding);
    let top = y_min.saturating_sub(padding);
    let right = (x_max + 1 + padding).min(image.width());
    let bottom = (y_max + 1 + padding).min(image.height());

    let cropped = imageops::crop_imm(image, left, top, right - left, bottom - top).to_image();
    let (width, height) = cropped.dimensions();
    let side = width.max(height);

    let mut square = RgbaImage::from_pixel(side, side, Rgba([0, 0, 0, 0]));
    imageops::replace(
        &mut square,
        &cropped,
        ((side - width) / 2) as i64,
        ((side - height) / 2) as i64,
    );

    imageops::resize(&square, target_size, target_size, FilterType::Lanczos3)
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Image download failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Image download returned HTTP {0}")]
    Status(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Image could not be decoded: {0}")]
    Decode(image::ImageError),

    #[error(transparent)]
    Segmentation(SegmentationError),

    #[error("Image processing task failed: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
#[error("None of the {attempted} source images could be processed")]
pub struct NoUsableImagesError {
    pub attempted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transparent(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]))
    }

    #[test]
    fn test_bounds_from_alpha() {
        let mut image = transparent(100, 80);
        image.put_pixel(20, 30, Rgba([255, 0, 0, 255]));
        image.put_pixel(60, 50, Rgba([255, 0, 0, 255]));
        // Below the threshold, ignored
        image.put_pixel(90, 70, Rgba([255, 0, 0, 10]));

        assert_eq!(foreground_bounds(&image, ForegroundMask::Alpha), Some((20, 30, 60, 50)));
    }

    #[test]
    fn test_bounds_from_luminance() {
        let mut image = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        image.put_pixel(3, 4, Rgba([30, 30, 30, 255]));
        assert_eq!(foreground_bounds(&image, ForegroundMask::Luminance), Some((3, 4, 3, 4)));
        assert_eq!(foreground_bounds(&image, ForegroundMask::Alpha), Some((0, 0, 9, 9)));
    }

    #[test]
    fn test_contentless_image_is_resized() {
        let image = transparent(300, 200);
        let out = center_and_crop(&image, 64, CROP_PADDING, ForegroundMask::Alpha);
        assert_eq!(out.dimensions(), (64, 64));
        assert!(out.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_subject_is_centered_and_squared() {
        // Wide subject near the left edge of a large canvas
        let mut image = transparent(1000, 1000);
        for x in 100..300 {
            for y in 500..550 {
                image.put_pixel(x, y, Rgba([0, 200, 0, 255]));
            }
        }

        let out = center_and_crop(&image, 100, 0, ForegroundMask::Alpha);
        assert_eq!(out.dimensions(), (100, 100));
        // Subject spans the full width and sits in the vertical middle
        assert!(out.get_pixel(50, 50).0[3] > 200);
        assert!(out.get_pixel(2, 50).0[3] > 200);
        assert!(out.get_pixel(50, 5).0[3] < FOREGROUND_THRESHOLD);
        assert!(out.get_pixel(50, 95).0[3] < FOREGROUND_THRESHOLD);
    }

    #[test]
    fn test_padding_is_clamped_to_image() {
        let mut image = transparent(60, 60);
        image.put_pixel(0, 0, Rgba([1, 2, 3, 255]));
        image.put_pixel(59, 59, Rgba([1, 2, 3, 255]));
        let out = center_and_crop(&image, 60, CROP_PADDING, ForegroundMask::Alpha);
        // Whole image kept, no rescale needed
        assert_eq!(out.dimensions(), (60, 60));
        assert_eq!(out.get_pixel(0, 0).0[3], 255);
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let mut image = transparent(400, 300);
        for x in 150..250 {
            for y in 100..260 {
                image.put_pixel(x, y, Rgba([(x % 255) as u8, (y % 255) as u8, 90, 255]));
            }
        }
        let a = center_and_crop(&image, 128, CROP_PADDING, ForegroundMask::Alpha);
        let b = center_and_crop(&image, 128, CROP_PADDING, ForegroundMask::Alpha);
        assert_eq!(a, b);
    }
}
