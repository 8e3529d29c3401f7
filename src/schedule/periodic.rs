//! Jobs that run at most once per tick on their own interval.

use std::time::{Duration, Instant};

/// Due-time tracker for one periodic job.
///
/// A job is due when the tick's clock sample has reached its due time.
/// After it fires the next due time is `now + interval`, measured from the
/// same sample the check used.
#[derive(Debug, Clone)]
pub struct PeriodicJob {
    name: &'static str,
    interval: Duration,
    next_due: Instant,
}

impl PeriodicJob {
    /// Creates a job that is first due at `start`.
    #[must_use]
    pub const fn new(name: &'static str, interval: Duration, start: Instant) -> Self {
        Self {
            name,
            interval,
            next_due: start,
        }
    }

    /// Job name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Interval between runs.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Next due time.
    #[must_use]
    pub const fn next_due(&self) -> Instant {
        self.next_due
    }

    /// True if the job should run at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Returns true and reschedules if the job is due at `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.next_due = now + self.interval;
        true
    }
}
