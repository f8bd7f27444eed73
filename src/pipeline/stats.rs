//! Live pipeline counters.
//!
//! One struct of atomics, shared by `Arc` between the capture loop, the work
//! queue, the analysis worker and any status reader. Counters are
//! individually atomic; a snapshot is not linearizable across counters.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct PipelineStats {
    pub frames_captured: AtomicU64,
    pub frames_invalid: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub frames_admitted: AtomicU64,
    pub frames_throttled: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_analyzed: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub inference_failures: AtomicU64,
    pub alerts_raised: AtomicU64,
    pub persistence_failures: AtomicU64,
    degraded: AtomicBool,
    started_at: Instant,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            frames_invalid: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            frames_admitted: AtomicU64::new(0),
            frames_throttled: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_analyzed: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            alerts_raised: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Persistence failed at least once; evidence durability is degraded.
    pub fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Relaxed);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_invalid: self.frames_invalid.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_admitted: self.frames_admitted.load(Ordering::Relaxed),
            frames_throttled: self.frames_throttled.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            degraded: self.is_degraded(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_invalid: u64,
    pub frames_skipped: u64,
    pub frames_admitted: u64,
    pub frames_throttled: u64,
    pub frames_dropped: u64,
    pub frames_analyzed: u64,
    pub frames_rejected: u64,
    pub inference_failures: u64,
    pub alerts_raised: u64,
    pub persistence_failures: u64,
    pub degraded: bool,
    pub elapsed_secs: f64,
}

impl StatsSnapshot {
    /// One-line status used by the health log and the status spinner.
    pub fn status_line(&self) -> String {
        format!(
            "captured={} admitted={} skipped={} dropped={} analyzed={} alerts={}{}",
            self.frames_captured,
            self.frames_admitted,
            self.frames_skipped,
            self.frames_dropped,
            self.frames_analyzed,
            self.alerts_raised,
            if self.degraded { " DEGRADED" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = PipelineStats::new();
        stats.inc(&stats.frames_captured);
        stats.inc(&stats.frames_captured);
        stats.inc(&stats.frames_dropped);
        let snap = stats.snapshot();
        assert_eq!(snap.frames_captured, 2);
        assert_eq!(snap.frames_dropped, 1);
        assert!(!snap.degraded);
    }

    #[test]
    fn degraded_flag_is_sticky() {
        let stats = PipelineStats::new();
        stats.mark_degraded();
        assert!(stats.snapshot().degraded);
        assert!(stats.snapshot().status_line().ends_with("DEGRADED"));
    }
}
