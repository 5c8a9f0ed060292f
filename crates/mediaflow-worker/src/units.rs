//! Built-in image work units.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat};
use tracing::debug;

use mediaflow_models::{STEP_RESIZE, STEP_THUMBNAIL};
use mediaflow_storage::ObjectStore;

use crate::error::WorkError;
use crate::work::{WorkRegistry, WorkUnit};

const JPEG_QUALITY: u8 = 85;
const RESIZE_MAX_DIMENSION: u32 = 1024;
const THUMBNAIL_MAX_DIMENSION: u32 = 256;

/// Scales an image to fit within a square bound and stores it as JPEG.
/// Images already inside the bound are re-encoded at their own size.
pub struct FitImage {
    objects: Arc<dyn ObjectStore>,
    max_dimension: u32,
}

impl FitImage {
    pub fn new(objects: Arc<dyn ObjectStore>, max_dimension: u32) -> Self {
        Self {
            objects,
            max_dimension,
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }
}

/// Decode, fit and encode. CPU bound.
pub fn fit_to_jpeg(data: &[u8], max_dimension: u32) -> Result<Vec<u8>, WorkError> {
    let img = image::load_from_memory(data)
        .map_err(|e| WorkError::permanent(format!("undecodable input: {}", e)))?;

    let fitted = if img.width() > max_dimension || img.height() > max_dimension {
        img.thumbnail(max_dimension, max_dimension)
    } else {
        img
    };

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(fitted.to_rgb8())
        .write_to(&mut out, ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .map_err(|e| WorkError::failed(format!("jpeg encode failed: {}", e)))?;
    Ok(out.into_inner())
}

#[async_trait]
impl WorkUnit for FitImage {
    async fn execute(&self, input_key: &str, output_key: &str) -> Result<(), WorkError> {
        let data = self.objects.get_bytes(input_key).await?;
        debug!(input_key, bytes = data.len(), max = self.max_dimension, "Fitting image");

        let max_dimension = self.max_dimension;
        let encoded = tokio::task::spawn_blocking(move || fit_to_jpeg(&data, max_dimension))
            .await
            .map_err(|e| WorkError::failed(format!("image task aborted: {}", e)))??;

        self.objects
            .put_bytes(output_key, encoded, "image/jpeg")
            .await?;
        Ok(())
    }
}

/// Registry with `resize` and `thumbnail`.
pub fn builtin_registry(objects: Arc<dyn ObjectStore>) -> WorkRegistry {
    WorkRegistry::new()
        .with(
            STEP_RESIZE,
            Arc::new(FitImage::new(objects.clone(), RESIZE_MAX_DIMENSION)),
        )
        .with(
            STEP_THUMBNAIL,
            Arc::new(FitImage::new(objects, THUMBNAIL_MAX_DIMENSION)),
        )
}
