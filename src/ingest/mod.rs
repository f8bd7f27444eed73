//! Frame sources.
//!
//! - `stub://name[?frames=N&width=W&height=H]`: synthetic scene (tests, demos)
//! - `http(s)://...`: MJPEG stream or JPEG snapshot endpoint
//! - anything else: a local directory of JPEG/PNG images, replayed in name order
//!
//! Sources only capture and decode. They never retain a frame after handing
//! it to the capture loop.
//!
//! Error contract of `FrameSource::next_frame`:
//! - `Ok(None)`: end of stream, the capture loop stops in order
//! - `Err(InvalidFrame)`: this frame is unusable, capture continues
//! - `Err(SourceFailed)`: transient read failure; the capture loop retries
//!   with backoff and gives up after a bounded number of consecutive failures

mod directory;
mod mjpeg;
mod synthetic;

pub use directory::DirectorySource;
pub use mjpeg::{MjpegSettings, MjpegSource};
pub use synthetic::{SyntheticSettings, SyntheticSource};

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use url::Url;

use crate::error::PipelineError;
use crate::frame::Frame;

pub trait FrameSource: Send {
    /// Source identifier for logs.
    fn name(&self) -> String;

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;
}

const URL_SCHEMES: [&str; 3] = ["stub://", "http://", "https://"];

/// Open the source selected by `url`.
pub fn open_source(url: &str) -> Result<Box<dyn FrameSource>> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("source url must not be empty"));
    }
    if URL_SCHEMES.iter().any(|scheme| trimmed.starts_with(scheme)) {
        let parsed =
            Url::parse(trimmed).with_context(|| format!("parse source url {:?}", trimmed))?;
        return match parsed.scheme() {
            "stub" => {
                let settings = SyntheticSettings::from_url(&parsed)?;
                Ok(Box::new(SyntheticSource::new(settings)))
            }
            _ => Ok(Box::new(MjpegSource::new(MjpegSettings {
                url: parsed.to_string(),
                ..MjpegSettings::default()
            }))),
        };
    }
    if trimmed.contains("://") {
        return Err(anyhow!(
            "unsupported source {:?}; expected stub://, http(s):// or a local directory",
            trimmed
        ));
    }
    Ok(Box::new(DirectorySource::open(Path::new(trimmed))?))
}

/// Decode a JPEG/PNG buffer into a frame.
pub(crate) fn decode_frame(bytes: &[u8], sequence: u64) -> Result<Frame, PipelineError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::InvalidFrame(format!("decode: {}", e)))?;
    Frame::new(image.into_rgb8(), sequence, chrono::Utc::now())
}
