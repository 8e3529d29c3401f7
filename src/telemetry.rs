//! Persisted telemetry sampling.

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::entity::Frame;
use crate::simulation::Simulation;
use crate::storage::LiveStats;

/// Computes the live-stats record pushed to storage.
///
/// The tick rate is the frame delta over the monotonic time elapsed since
/// the previous sample. The first sample has no predecessor and reports no
/// rate.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySampler {
    last: Option<(Instant, Frame)>,
}

impl TelemetrySampler {
    /// Creates a sampler with no previous sample.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Frames per second between the previous sample and `(now, frame)`,
    /// then remembers this sample.
    pub fn rate(&mut self, now: Instant, frame: Frame) -> Option<f64> {
        let rate = self.last.and_then(|(then, then_frame)| {
            let secs = now.checked_duration_since(then)?.as_secs_f64();
            (secs > 0.0).then(|| frame.saturating_sub(then_frame) as f64 / secs)
        });
        self.last = Some((now, frame));
        rate
    }

    /// Builds the record for `sim` as of `now`.
    pub fn sample<S: Simulation + ?Sized>(&mut self, now: Instant, recorded_at: DateTime<Utc>, sim: &S) -> LiveStats {
        let frame = sim.current_frame();
        let queues = sim.queue_stats();
        let mass = sim.mass_totals();
        LiveStats {
            recorded_at,
            tick_rate: self.rate(now, frame),
            frame,
            active_count: sim.active_count(),
            startup_queue_len: queues.startup_pending,
            shutdown_queue_len: queues.shutdown_pending,
            living_mass: mass.living,
            dead_mass: mass.dead,
        }
    }
}
