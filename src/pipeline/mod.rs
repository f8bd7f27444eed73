//! Capture -> motion gate -> bounded queue -> verification -> persistence.
//!
//! Two threads per pipeline:
//! - capture: owns the source and the motion gate, never blocks on analysis
//! - worker: the single consumer of the queue, owns the verifier and store
//!
//! `Pipeline::start` returns a `PipelineHandle` for stop/abort/join.

mod capture;
mod stats;
mod supervisor;
mod worker;

pub use stats::{PipelineStats, StatsSnapshot};
pub use supervisor::{EndReason, PipelineHandle, PipelineReport, Stopper};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::alert::AlertStore;
use crate::config::VigilConfig;
use crate::inference::{InferenceClient, MoondreamService};
use crate::ingest::{open_source, FrameSource};
use crate::motion::{MotionGate, MotionSettings};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::queue::WorkQueue;
use crate::verify::Verifier;

use capture::CaptureLoop;
use supervisor::Control;
use worker::AnalysisWorker;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Minimum spacing between enqueued frames. Zero disables throttling.
    pub analysis_interval: Duration,
    pub queue_capacity: usize,
    /// Consecutive source read failures tolerated before giving up.
    pub max_source_failures: u32,
    pub source_retry_backoff: Duration,
    pub health_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            analysis_interval: Duration::from_secs(2),
            queue_capacity: 10,
            max_source_failures: 50,
            source_retry_backoff: Duration::from_millis(100),
            health_interval: Duration::from_secs(5),
        }
    }
}

/// A fully wired, not yet running pipeline.
pub struct Pipeline {
    settings: PipelineSettings,
    motion: MotionSettings,
    source: Box<dyn FrameSource>,
    verifier: Verifier,
    store: AlertStore,
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        motion: MotionSettings,
        source: Box<dyn FrameSource>,
        verifier: Verifier,
        store: AlertStore,
    ) -> Self {
        Self {
            settings,
            motion,
            source,
            verifier,
            store,
            notifiers: Vec::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Wire source, Moondream client, store and notifiers from configuration.
    pub fn from_config(cfg: &VigilConfig) -> Result<Self> {
        let source = open_source(&cfg.source_url)?;
        let service = MoondreamService::new(cfg.inference.moondream_settings()?);
        let client = InferenceClient::new(Arc::new(service), cfg.inference.adapter_settings());
        let verifier = Verifier::new(client, cfg.verification.clone())?;
        let store = AlertStore::open(&cfg.storage).context("open alert store")?;

        let mut pipeline = Self::new(
            cfg.pipeline.clone(),
            cfg.motion.clone(),
            source,
            verifier,
            store,
        )
        .with_notifier(Box::new(LogNotifier));
        if let Some(url) = &cfg.webhook_url {
            let webhook = WebhookNotifier::new(url, cfg.inference.timeout)?;
            pipeline = pipeline.with_notifier(Box::new(webhook));
        }
        Ok(pipeline)
    }

    pub fn start(self) -> Result<PipelineHandle> {
        let stats = Arc::new(PipelineStats::new());
        let capacity = self.settings.queue_capacity;
        let queue = Arc::new(WorkQueue::new(capacity, Arc::clone(&stats)));
        let control = Arc::new(Control::default());

        log::info!(
            "pipeline starting: source={} interval={:.1}s queue={}",
            self.source.name(),
            self.settings.analysis_interval.as_secs_f64(),
            queue.capacity()
        );

        let worker = AnalysisWorker {
            queue: Arc::clone(&queue),
            verifier: self.verifier,
            store: self.store,
            notifiers: self.notifiers,
            stats: Arc::clone(&stats),
            control: Arc::clone(&control),
        };
        let worker = thread::Builder::new()
            .name("vigil-worker".to_string())
            .spawn(move || worker.run())
            .context("spawn analysis worker")?;

        let capture = CaptureLoop {
            source: self.source,
            gate: MotionGate::new(self.motion),
            queue: Arc::clone(&queue),
            stats: Arc::clone(&stats),
            control: Arc::clone(&control),
            settings: self.settings,
        };
        let capture_queue = Arc::clone(&queue);
        let capture = match thread::Builder::new()
            .name("vigil-capture".to_string())
            .spawn(move || capture.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                capture_queue.close();
                let _ = worker.join();
                return Err(err).context("spawn capture loop");
            }
        };

        Ok(PipelineHandle::new(control, queue, stats, capture, worker))
    }
}
