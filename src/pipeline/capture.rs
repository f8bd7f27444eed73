use std::sync::Arc;
use std::thread;
use std::time::Instant;

use super::stats::PipelineStats;
use super::supervisor::{CaptureExit, Control};
use super::PipelineSettings;
use crate::error::PipelineError;
use crate::ingest::FrameSource;
use crate::motion::MotionGate;
use crate::queue::{QueueEntry, WorkQueue};

const SKIP_LOG_EVERY: u64 = 30;

/// Capture loop. Never waits on analysis: a full queue drops the frame.
pub(crate) struct CaptureLoop {
    pub source: Box<dyn FrameSource>,
    pub gate: MotionGate,
    pub queue: Arc<WorkQueue>,
    pub stats: Arc<PipelineStats>,
    pub control: Arc<Control>,
    pub settings: PipelineSettings,
}

impl CaptureLoop {
    /// Runs until stop, end of stream, or a fatal source failure. Closes the
    /// queue on every exit path.
    pub fn run(mut self) -> Result<CaptureExit, PipelineError> {
        let result = self.capture();
        self.queue.close();
        match &result {
            Ok(exit) => log::info!("capture loop finished: {:?}", exit),
            Err(err) => log::error!("capture loop failed: {}", err),
        }
        result
    }

    fn capture(&mut self) -> Result<CaptureExit, PipelineError> {
        let mut consecutive_failures: u32 = 0;
        let mut last_enqueue: Option<Instant> = None;
        let mut last_health = Instant::now();
        let mut skipped: u64 = 0;

        loop {
            if self.control.is_stopping() {
                return Ok(CaptureExit::Stopped);
            }
            if last_health.elapsed() >= self.settings.health_interval {
                log::info!("health: {}", self.stats.snapshot().status_line());
                last_health = Instant::now();
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    frame
                }
                Ok(None) => return Ok(CaptureExit::EndOfStream),
                Err(PipelineError::InvalidFrame(msg)) => {
                    consecutive_failures = 0;
                    self.stats.inc(&self.stats.frames_invalid);
                    log::warn!("dropping invalid frame: {}", msg);
                    continue;
                }
                Err(err) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.settings.max_source_failures {
                        return Err(PipelineError::SourceFailed(format!(
                            "{} gave up after {} consecutive failures: {}",
                            self.source.name(),
                            consecutive_failures,
                            err
                        )));
                    }
                    log::warn!(
                        "source read failed ({}/{}): {}",
                        consecutive_failures,
                        self.settings.max_source_failures,
                        err
                    );
                    thread::sleep(self.settings.source_retry_backoff);
                    continue;
                }
            };
            self.stats.inc(&self.stats.frames_captured);

            let report = match self.gate.evaluate(&frame) {
                Ok(report) => report,
                Err(err) => {
                    self.stats.inc(&self.stats.frames_invalid);
                    log::warn!("frame #{}: {}", frame.sequence, err);
                    continue;
                }
            };
            if !report.changed {
                skipped += 1;
                self.stats.inc(&self.stats.frames_skipped);
                if skipped % SKIP_LOG_EVERY == 0 {
                    log::debug!("no motion: {} frames skipped so far", skipped);
                }
                continue;
            }

            if let Some(last) = last_enqueue {
                if last.elapsed() < self.settings.analysis_interval {
                    self.stats.inc(&self.stats.frames_throttled);
                    continue;
                }
            }
            if self.control.is_stopping() {
                return Ok(CaptureExit::Stopped);
            }

            self.stats.inc(&self.stats.frames_admitted);
            log::debug!(
                "frame #{}: motion over {} px, queueing",
                frame.sequence,
                report.changed_area
            );
            if self.queue.try_enqueue(QueueEntry::new(frame)) {
                last_enqueue = Some(Instant::now());
            }
        }
    }
}
