//! Vision-language inference boundary.
//!
//! - `VisionService`: the external service (describe an image, localize a
//!   label). Implementations are plain blocking request/response calls.
//! - `InferenceClient`: the adapter the worker uses. Applies the configured
//!   timeout as an explicit bounded wait and retries once on timeout only.
//! - `MoondreamService`: HTTP implementation of `VisionService`.

mod client;
mod moondream;

pub use client::{InferenceClient, InferenceSettings, MAX_TIMEOUT_RETRIES};
pub use moondream::{MoondreamService, MoondreamSettings};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure kinds of one inference operation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// Network or service error (including 4xx/5xx answers). Never retried.
    #[error("inference unavailable: {0}")]
    Unavailable(String),
    /// No answer within the configured timeout. Retried once.
    #[error("inference timed out")]
    Timeout,
}

/// A localized region in normalized (0..1) frame coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalizedRegion {
    #[serde(default)]
    pub label: String,
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl LocalizedRegion {
    pub fn new(label: &str, x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            label: label.to_string(),
            x_min,
            y_min,
            x_max,
            y_max,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Clamp into [0, 1] and order the corners. Returns `None` for
    /// non-finite coordinates.
    pub fn normalized(self) -> Option<Self> {
        let coords = [self.x_min, self.y_min, self.x_max, self.y_max];
        if coords.iter().any(|c| !c.is_finite()) {
            return None;
        }
        let clamp = |v: f32| v.clamp(0.0, 1.0);
        let (x0, x1) = (clamp(self.x_min), clamp(self.x_max));
        let (y0, y1) = (clamp(self.y_min), clamp(self.y_max));
        Some(Self {
            x_min: x0.min(x1),
            x_max: x0.max(x1),
            y_min: y0.min(y1),
            y_max: y0.max(y1),
            ..self
        })
    }

    /// Pixel rectangle `(x1, y1, x2, y2)` for a frame of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let px = |v: f32, extent: u32| ((v * extent as f32) as u32).min(extent.saturating_sub(1));
        (
            px(self.x_min, width),
            px(self.y_min, height),
            px(self.x_max, width),
            px(self.y_max, height),
        )
    }
}

/// External vision-language service.
///
/// Calls may block for as long as the remote takes; the adapter bounds them.
/// An empty `localize` result is a success, not a failure.
pub trait VisionService: Send + Sync {
    /// Service identifier for logs.
    fn name(&self) -> &'static str;

    /// Natural-language description of the image.
    fn describe(&self, image: &RgbImage, prompt: &str) -> Result<String, InferenceError>;

    /// Regions matching `label`, in the order the service reports them.
    fn localize(
        &self,
        image: &RgbImage,
        label: &str,
    ) -> Result<Vec<LocalizedRegion>, InferenceError>;
}
