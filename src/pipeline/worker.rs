use std::sync::Arc;

use super::stats::PipelineStats;
use super::supervisor::Control;
use crate::alert::AlertStore;
use crate::notify::{notify_all, Notifier};
use crate::queue::{QueueEntry, WorkQueue};
use crate::verify::{Outcome, RejectReason, Verifier};

/// Single consumer of the work queue. Failures are per-frame; the worker
/// only exits when the queue is closed and drained, or on abort.
pub(crate) struct AnalysisWorker {
    pub queue: Arc<WorkQueue>,
    pub verifier: Verifier,
    pub store: AlertStore,
    pub notifiers: Vec<Box<dyn Notifier>>,
    pub stats: Arc<PipelineStats>,
    pub control: Arc<Control>,
}

impl AnalysisWorker {
    pub fn run(mut self) {
        while let Ok(entry) = self.queue.dequeue() {
            if self.control.is_aborted() {
                let discarded = 1 + self.queue.drain_pending().len();
                log::info!("abort: discarded {} queued frame(s)", discarded);
                break;
            }
            self.process(entry);
        }
        log::info!("analysis worker finished");
    }

    fn process(&mut self, entry: QueueEntry) {
        let frame = entry.frame;
        let verdict = self.verifier.verify(&frame);
        self.stats.inc(&self.stats.frames_analyzed);

        if self.control.is_aborted() {
            log::debug!("frame #{}: result discarded after abort", frame.sequence);
            return;
        }

        match &verdict.outcome {
            Outcome::Rejected(reason) => {
                if matches!(reason, RejectReason::InferenceUnavailable(_)) {
                    self.stats.inc(&self.stats.inference_failures);
                }
                self.stats.inc(&self.stats.frames_rejected);
                log::debug!("frame #{}: rejected ({})", frame.sequence, reason);
            }
            Outcome::Admitted => match self.store.record(&verdict, &frame) {
                Ok(alert) => {
                    self.stats.inc(&self.stats.alerts_raised);
                    log::info!(
                        "frame #{}: alert #{} ({} region(s), keywords {:?})",
                        frame.sequence,
                        alert.id,
                        alert.detected_objects.len(),
                        alert.matched_keywords
                    );
                    notify_all(&self.notifiers, &alert);
                }
                Err(err) => {
                    self.stats.inc(&self.stats.persistence_failures);
                    self.stats.mark_degraded();
                    log::error!("frame #{}: alert not recorded: {}", frame.sequence, err);
                }
            },
        }
    }
}
