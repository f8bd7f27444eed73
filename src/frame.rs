//! Captured frames.
//!
//! - `Frame`: immutable RGB raster plus capture timestamp. Not `Clone`; a frame
//!   is owned by exactly one pipeline stage at a time and moves across the
//!   queue boundary.
//! - Annotated copies are produced downstream from `Frame::image`, the frame
//!   itself is never mutated after capture.

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::sync::Arc;

use crate::error::PipelineError;

/// Upper bound on either frame dimension. Anything larger is treated as a
/// malformed capture.
pub const MAX_FRAME_DIMENSION: u32 = 16_384;

/// Immutable captured frame.
///
/// Explicitly NOT implementing Clone: a frame is handed off, never aliased,
/// between capture, queue, and worker.
#[derive(Debug)]
pub struct Frame {
    /// Pixels are shared read-only with in-flight inference calls of the
    /// stage that owns the frame. No mutable access exists.
    image: Arc<RgbImage>,

    /// Source-local capture sequence number (starts at 1).
    pub sequence: u64,

    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap a decoded image. Rejects empty or oversized rasters.
    pub fn new(
        image: RgbImage,
        sequence: u64,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        let (width, height) = image.dimensions();
        validate_dimensions(width, height)?;
        Ok(Self {
            image: Arc::new(image),
            sequence,
            captured_at,
        })
    }

    /// Build a frame from packed RGB8 bytes.
    pub fn from_rgb(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        sequence: u64,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        validate_dimensions(width, height)?;
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(PipelineError::InvalidFrame(format!(
                "expected {} bytes for {}x{} rgb, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            PipelineError::InvalidFrame("pixel buffer does not match dimensions".to_string())
        })?;
        Self::new(image, sequence, captured_at)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Read-only handle for inference calls that outlive a borrow (bounded
    /// waits run the call on a helper thread).
    pub(crate) fn shared_image(&self) -> Arc<RgbImage> {
        Arc::clone(&self.image)
    }
}

/// JPEG-encode an RGB image in memory.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100)).encode_image(image)?;
    Ok(bytes)
}

fn validate_dimensions(width: u32, height: u32) -> Result<(), PipelineError> {
    if width == 0 || height == 0 {
        let detail = format!("empty frame {}x{}", width, height);
        return Err(PipelineError::InvalidFrame(detail));
    }
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(PipelineError::InvalidFrame(format!(
            "frame {}x{} exceeds {} px",
            width, height, MAX_FRAME_DIMENSION
        )));
    }
    Ok(())
}
