//! Lifecycle of a running pipeline.
//!
//! - `stop`: admission stops and the queue closes at once; the worker drains
//!   every queued entry before exiting
//! - `abort`: as `stop`, and the worker discards queued entries and the result
//!   of any in-flight call
//! - `join`: waits for both threads and reports how the run ended

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::stats::{PipelineStats, StatsSnapshot};
use crate::error::PipelineError;
use crate::queue::WorkQueue;

#[derive(Debug, Default)]
pub(crate) struct Control {
    stopping: AtomicBool,
    aborted: AtomicBool,
}

impl Control {
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub(crate) enum CaptureExit {
    Stopped,
    EndOfStream,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Stopped,
    Aborted,
    EndOfStream,
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineReport {
    pub end: EndReason,
    pub stats: StatsSnapshot,
}

impl PipelineReport {
    pub fn is_degraded(&self) -> bool {
        self.stats.degraded
    }
}

/// Cloneable stop/abort trigger, e.g. for a signal handler.
#[derive(Clone)]
pub struct Stopper {
    control: Arc<Control>,
    queue: Arc<WorkQueue>,
}

impl Stopper {
    pub fn stop(&self) {
        if !self.control.stopping.swap(true, Ordering::SeqCst) {
            log::info!(
                "stop requested; draining {} queued frame(s)",
                self.queue.len()
            );
        }
        self.queue.close();
    }

    pub fn abort(&self) {
        self.control.stopping.store(true, Ordering::SeqCst);
        if !self.control.aborted.swap(true, Ordering::SeqCst) {
            log::warn!("abort requested; discarding queued and in-flight work");
        }
        self.queue.close();
    }

    pub fn is_stopping(&self) -> bool {
        self.control.is_stopping()
    }
}

pub struct PipelineHandle {
    stopper: Stopper,
    stats: Arc<PipelineStats>,
    capture: JoinHandle<Result<CaptureExit, PipelineError>>,
    worker: JoinHandle<()>,
}

impl PipelineHandle {
    pub(crate) fn new(
        control: Arc<Control>,
        queue: Arc<WorkQueue>,
        stats: Arc<PipelineStats>,
        capture: JoinHandle<Result<CaptureExit, PipelineError>>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            stopper: Stopper { control, queue },
            stats,
            capture,
            worker,
        }
    }

    pub fn stop(&self) {
        self.stopper.stop();
    }

    pub fn abort(&self) {
        self.stopper.abort();
    }

    pub fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Whether the queue still takes new frames. False from the moment stop
    /// or abort is requested.
    pub fn is_accepting(&self) -> bool {
        !self.stopper.queue.is_closed()
    }

    /// Wait for both threads. A fatal source failure is returned as an error
    /// after the worker has drained the queue.
    pub fn join(self) -> Result<PipelineReport> {
        let capture = self
            .capture
            .join()
            .map_err(|_| anyhow!("capture thread panicked"));
        if capture.is_err() {
            self.stopper.queue.close();
        }
        self.worker
            .join()
            .map_err(|_| anyhow!("analysis worker panicked"))?;

        let exit = capture??;
        let end = if self.stopper.control.is_aborted() {
            EndReason::Aborted
        } else {
            match exit {
                CaptureExit::Stopped => EndReason::Stopped,
                CaptureExit::EndOfStream => EndReason::EndOfStream,
            }
        };
        Ok(PipelineReport {
            end,
            stats: self.stats.snapshot(),
        })
    }
}
