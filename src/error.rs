//! Error taxonomy for the analysis pipeline.
//!
//! Only `SourceFailed` is fatal to a running pipeline. Everything else is
//! handled locally: the offending frame is dropped or rejected and the
//! pipeline keeps going.

use thiserror::Error;

use crate::inference::InferenceError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed capture. The frame is dropped, capture continues.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Inference service unreachable or answered with an error.
    #[error("inference unavailable: {0}")]
    InferenceUnavailable(String),

    /// Inference service did not answer within the configured timeout.
    #[error("inference timed out")]
    InferenceTimeout,

    /// Local storage error while persisting evidence.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// The work queue was closed. Expected during shutdown.
    #[error("work queue closed")]
    QueueClosed,

    /// The frame source is permanently unavailable.
    #[error("frame source failed: {0}")]
    SourceFailed(String),
}

impl PipelineError {
    pub fn persistence(context: &str, err: impl std::fmt::Display) -> Self {
        PipelineError::PersistenceFailed(format!("{}: {}", context, err))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::SourceFailed(_))
    }
}

impl From<InferenceError> for PipelineError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Unavailable(msg) => PipelineError::InferenceUnavailable(msg),
            InferenceError::Timeout => PipelineError::InferenceTimeout,
        }
    }
}
