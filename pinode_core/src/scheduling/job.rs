use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A recurring read of one value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PollJob {
    pub device_id: String,
    pub value_id: String,
}

impl PollJob {
    pub fn new(device_id: &str, value_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            value_id: value_id.to_string(),
        }
    }
}

impl fmt::Display for PollJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.value_id)
    }
}

/// Counters shared between the timer thread and the lane running the poll
#[derive(Debug, Default)]
pub(crate) struct JobCounters {
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub skipped: AtomicU64,
}

impl JobCounters {
    pub fn snapshot(&self) -> PollStats {
        PollStats {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Per-job outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Reads that succeeded and were published
    pub completed: u64,
    /// Reads (or reopen attempts) that failed
    pub failed: u64,
    /// Ticks dropped because the previous poll was still running
    pub skipped: u64,
}

/// Snapshot of one registered job
#[derive(Debug, Clone, Serialize)]
pub struct PollJobInfo {
    pub job: PollJob,
    pub interval: Duration,
    pub in_flight: bool,
    pub stats: PollStats,
}

/// Scheduler-side state of a registered job
pub(crate) struct JobEntry {
    pub interval: Duration,
    pub next_due: Instant,
    pub in_flight: Arc<AtomicBool>,
    pub counters: Arc<JobCounters>,
}

impl JobEntry {
    pub fn new(interval: Duration, first_due: Instant) -> Self {
        Self {
            interval,
            next_due: first_due,
            in_flight: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(JobCounters::default()),
        }
    }

    /// Move to the next tick. Missed ticks are dropped, never replayed in a burst.
    pub fn advance(&mut self, now: Instant) {
        let next = self.next_due + self.interval;
        self.next_due = if next <= now { now + self.interval } else { next };
    }
}
