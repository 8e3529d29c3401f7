//! Absolute-deadline frame pacing.

use std::time::{Duration, Instant};

use log::warn;

use super::clock::Clock;

/// Tracks the deadline of the next frame.
///
/// The deadline series is `start + k * period`. Waiting never re-bases it
/// on the current time: after an overrun the wait returns at once and the
/// following deadline is still on the original grid.
#[derive(Debug, Clone)]
pub struct FramePacer {
    period: Duration,
    next_deadline: Instant,
}

impl FramePacer {
    /// Creates a pacer whose first deadline is `start`.
    #[must_use]
    pub const fn new(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next_deadline: start,
        }
    }

    /// Frame period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Deadline the next `wait` blocks until.
    #[must_use]
    pub const fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Re-anchors the grid at `start`.
    pub fn reset(&mut self, start: Instant) {
        self.next_deadline = start;
    }

    /// Waits for the current deadline, then advances it by one period.
    ///
    /// A failed wait is logged and pacing continues best-effort. Returns
    /// the deadline that was waited for.
    pub fn wait<C: Clock + ?Sized>(&mut self, clock: &C) -> Instant {
        let deadline = self.next_deadline;
        if let Err(e) = clock.sleep_until(deadline) {
            warn!("frame wait failed, continuing: {e}");
        }
        self.next_deadline = deadline + self.period;
        deadline
    }
}
