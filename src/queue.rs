//! Bounded work queue between the capture loop and the analysis worker.
//!
//! - Strict FIFO.
//! - `try_enqueue` never blocks. At capacity the incoming entry is dropped
//!   (newest-dropped), so the worker keeps making progress on older evidence.
//! - `dequeue` blocks until an entry is available, or fails with
//!   `QueueClosed` once the queue is closed and drained.
//! - `close` is idempotent and wakes every waiter.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::pipeline::PipelineStats;

/// An admitted frame waiting for analysis.
#[derive(Debug)]
pub struct QueueEntry {
    pub frame: Frame,
    pub admitted_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            admitted_at: Utc::now(),
        }
    }
}

struct QueueState {
    entries: VecDeque<QueueEntry>,
    closed: bool,
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
    stats: Arc<PipelineStats>,
}

impl WorkQueue {
    /// `capacity` must be at least 1 (validated by configuration).
    pub fn new(capacity: usize, stats: Arc<PipelineStats>) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
            stats,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-blocking enqueue. Returns false (and drops the entry) when full or
    /// closed. Only drops caused by a full queue are counted.
    pub fn try_enqueue(&self, entry: QueueEntry) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        if state.entries.len() >= self.capacity {
            drop(state);
            self.stats.inc(&self.stats.frames_dropped);
            log::warn!(
                "analysis queue full ({}), dropping frame #{}",
                self.capacity,
                entry.frame.sequence
            );
            return false;
        }
        state.entries.push_back(entry);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Block until an entry is available. `QueueClosed` means closed and
    /// drained.
    pub fn dequeue(&self) -> Result<QueueEntry, PipelineError> {
        let mut state = self.lock();
        loop {
            if let Some(entry) = state.entries.pop_front() {
                return Ok(entry);
            }
            if state.closed {
                return Err(PipelineError::QueueClosed);
            }
            state = match self.available.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Close the queue. Further enqueues are rejected; queued entries remain
    /// available to `dequeue` until drained.
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            log::debug!("analysis queue closed with {} pending", state.entries.len());
        }
        drop(state);
        self.available.notify_all();
    }

    /// Remove and return every pending entry without analysing it.
    pub fn drain_pending(&self) -> Vec<QueueEntry> {
        self.lock().entries.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Poisoning cannot leave the deque half-updated.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
