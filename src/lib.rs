//! Vigil: motion-gated scene analysis.
//!
//! # Architecture
//!
//! A capture loop pulls frames from a source and runs them through a cheap
//! frame-differencing gate. Frames that show motion are handed over a bounded
//! queue to a single analysis worker, which asks a vision-language service
//! to describe the scene and, when the description names something worth
//! alerting on, to localize it. Only a keyword match corroborated by at least
//! one localized region becomes an alert.
//!
//! Capture never waits on analysis. When the worker falls behind, the queue
//! drops the newest frame and counts it.
//!
//! # Module Structure
//!
//! - `frame`: immutable captured frames
//! - `ingest`: frame sources (synthetic, HTTP MJPEG, image directory)
//! - `motion`: the motion gate
//! - `queue`: bounded FIFO between capture and analysis
//! - `inference`: vision service boundary and the timeout/retry adapter
//! - `verify`: two-stage verification (keywords, then localization)
//! - `alert`, `storage`: evidence images and the append-only alert index
//! - `notify`: alert sinks (log, webhook)
//! - `pipeline`: threads, counters and lifecycle
//! - `config`: file/env configuration

pub mod alert;
pub mod config;
pub mod error;
pub mod frame;
pub mod inference;
pub mod ingest;
pub mod motion;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod ui;
pub mod verify;

pub use alert::{Alert, AlertStore, BoundingBox, IndexBackend, StorageSettings};
pub use config::{CliOverrides, VigilConfig};
pub use error::PipelineError;
pub use frame::Frame;
pub use inference::{
    InferenceClient, InferenceError, InferenceSettings, LocalizedRegion, VisionService,
};
pub use ingest::{open_source, FrameSource};
pub use motion::{MotionGate, MotionReport, MotionSettings};
pub use pipeline::{
    EndReason, Pipeline, PipelineHandle, PipelineReport, PipelineSettings, PipelineStats,
};
pub use queue::{QueueEntry, WorkQueue};
pub use verify::{Verdict, VerificationSettings, Verifier};
