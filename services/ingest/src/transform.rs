//! Thumbnail generation.
//!
//! Decodes any supported raster format (guessed from content), shrinks it so neither
//! side exceeds the maximum dimension and re-encodes it as JPEG with Huffman tables
//! optimized for the image. Images already within bounds keep their dimensions.
//! CPU-bound: call [`ThumbnailTransform::generate_async`] from async code.

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use jpeg_encoder::{ColorType as JpegColorType, Encoder, EncodingError};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Default bound on the larger output dimension
pub const DEFAULT_MAX_DIMENSION: u32 = 800;
/// Default JPEG quality
pub const DEFAULT_QUALITY: u8 = 85;
/// Largest side a baseline JPEG frame can describe
pub const MAX_JPEG_DIMENSION: u32 = u16::MAX as u32;

/// Errors that can occur while producing a thumbnail.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode thumbnail: {0}")]
    Encode(#[source] EncodingError),

    #[error("Thumbnail dimensions {width}x{height} exceed the JPEG limit")]
    Dimensions { width: u32, height: u32 },

    #[error("Thumbnail task failed: {0}")]
    Task(String),
}

/// An encoded thumbnail
#[derive(Debug, Clone)]
pub struct Thumbnail {
    /// JPEG bytes
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ThumbnailTransform {
    max_dimension: u32,
    quality: u8,
}

impl Default for ThumbnailTransform {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION, DEFAULT_QUALITY)
    }
}

impl ThumbnailTransform {
    pub fn new(max_dimension: u32, quality: u8) -> Self {
        Self {
            max_dimension: max_dimension.clamp(1, MAX_JPEG_DIMENSION),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Produce a thumbnail (blocking).
    pub fn generate(&self, raw: &[u8]) -> Result<Thumbnail, TransformError> {
        let img = image::load_from_memory(raw).map_err(TransformError::Decode)?;

        let (orig_w, orig_h) = img.dimensions();
        let (width, height) = fit_within(orig_w, orig_h, self.max_dimension);

        let img = if (width, height) == (orig_w, orig_h) {
            img
        } else {
            img.resize_exact(width, height, FilterType::Lanczos3)
        };

        let data = self.encode_jpeg(&img)?;

        debug!(
            original_width = orig_w,
            original_height = orig_h,
            width = width,
            height = height,
            size_bytes = data.len(),
            "Thumbnail generated"
        );

        Ok(Thumbnail {
            data,
            width,
            height,
        })
    }

    /// Produce a thumbnail on the blocking thread pool.
    pub async fn generate_async(self: Arc<Self>, raw: Bytes) -> Result<Thumbnail, TransformError> {
        tokio::task::spawn_blocking(move || self.generate(&raw))
            .await
            .map_err(|e| TransformError::Task(e.to_string()))?
    }

    /// 8-bit grayscale stays grayscale; everything else is flattened to 8-bit RGB.
    fn encode_jpeg(&self, img: &DynamicImage) -> Result<Bytes, TransformError> {
        let (width, height) = img.dimensions();
        let (w, h) = match (u16::try_from(width), u16::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => return Err(TransformError::Dimensions { width, height }),
        };

        let mut buf = Vec::new();
        {
            let mut encoder = Encoder::new(&mut buf, self.quality);
            encoder.set_optimized_huffman_tables(true);

            match img {
                DynamicImage::ImageLuma8(gray) => {
                    encoder.encode(gray.as_raw(), w, h, JpegColorType::Luma)
                }
                other => {
                    let rgb = other.to_rgb8();
                    encoder.encode(rgb.as_raw(), w, h, JpegColorType::Rgb)
                }
            }
            .map_err(TransformError::Encode)?;
        }

        Ok(Bytes::from(buf))
    }
}

/// Output dimensions for an image of `width` x `height`.
///
/// Within bounds the size is unchanged. Otherwise the larger side becomes exactly
/// `max_dimension` and the other is scaled by the same factor, rounded, at least 1.
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    let scale_other = |other: u32, larger: u32| -> u32 {
        let scaled = (other as f64 * max_dimension as f64 / larger as f64).round() as u32;
        scaled.clamp(1, max_dimension)
    };

    if width >= height {
        (max_dimension, scale_other(height, width))
    } else {
        (scale_other(width, height), max_dimension)
    }
}

/// Produce a JPEG thumbnail bounded by `max_dimension` at the default quality.
pub fn transform(raw: &[u8], max_dimension: u32) -> Result<Thumbnail, TransformError> {
    ThumbnailTransform::new(max_dimension, DEFAULT_QUALITY).generate(raw)
}
