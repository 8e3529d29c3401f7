//! Monotonic time sources.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ScheduleError;

/// Monotonic time plus absolute-deadline waiting.
pub trait Clock {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Blocks until `deadline` has been reached. Returns immediately if it
    /// already passed.
    ///
    /// # Errors
    ///
    /// `WaitFailed` if the wait could not be performed; callers treat this
    /// as non-fatal.
    fn sleep_until(&self, deadline: Instant) -> Result<(), ScheduleError>;
}

/// The process monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> Result<(), ScheduleError> {
        // thread::sleep may wake early; re-check against the deadline.
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(deadline - now);
        }
    }
}

#[derive(Debug)]
struct ManualState {
    now: Instant,
    waits: Vec<Instant>,
    fail_waits: bool,
}

/// Deterministic clock for tests.
///
/// Time only moves through [`ManualClock::advance`] and through waits,
/// which jump straight to their deadline. Every requested deadline is
/// recorded. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
    origin: Instant,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: origin,
                waits: Vec::new(),
                fail_waits: false,
            })),
            origin,
        }
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves time forward, as if work took `by`.
    pub fn advance(&self, by: Duration) {
        self.state().now += by;
    }

    /// Time elapsed since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.state().now - self.origin
    }

    /// Instant the clock was created at.
    #[must_use]
    pub const fn origin(&self) -> Instant {
        self.origin
    }

    /// Deadlines passed to `sleep_until`, oldest first.
    #[must_use]
    pub fn waits(&self) -> Vec<Instant> {
        self.state().waits.clone()
    }

    /// Makes subsequent waits fail without moving time.
    pub fn set_fail_waits(&self, fail: bool) {
        self.state().fail_waits = fail;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state().now
    }

    fn sleep_until(&self, deadline: Instant) -> Result<(), ScheduleError> {
        let mut state = self.state();
        state.waits.push(deadline);
        if state.fail_waits {
            return Err(ScheduleError::WaitFailed {
                message: "manual clock refused to wait".to_string(),
            });
        }
        if deadline > state.now {
            state.now = deadline;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_sleep_until_reaches_deadline() {
        let clock = MonotonicClock;
        let deadline = clock.now() + Duration::from_millis(5);
        clock.sleep_until(deadline).unwrap();
        assert!(clock.now() >= deadline);
    }

    #[test]
    fn monotonic_past_deadline_returns_immediately() {
        let clock = MonotonicClock;
        let start = Instant::now();
        clock.sleep_until(start).unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn manual_wait_jumps_to_deadline() {
        let clock = ManualClock::new();
        let deadline = clock.now() + Duration::from_millis(16);
        clock.sleep_until(deadline).unwrap();
        assert_eq!(clock.now(), deadline);
        assert_eq!(clock.waits(), vec![deadline]);
    }

    #[test]
    fn manual_wait_on_past_deadline_keeps_time() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(30));
        let before = clock.now();
        clock.sleep_until(clock.origin() + Duration::from_millis(10)).unwrap();
        assert_eq!(clock.now(), before);
        assert_eq!(clock.elapsed(), Duration::from_millis(30));
    }

    #[test]
    fn manual_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        other.advance(Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn manual_failed_wait_is_reported() {
        let clock = ManualClock::new();
        clock.set_fail_waits(true);
        let err = clock.sleep_until(clock.now() + Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ScheduleError::WaitFailed { .. }));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
