//! Fixed-rate pacing for the simulation thread.
//!
//! A `FramePacer` holds the absolute deadline of the next frame and only
//! ever advances it by whole periods, so late ticks never shift the
//! cadence. `PeriodicJob`s are checked against the single clock sample
//! taken once per tick.

pub mod clock;
pub mod pacer;
pub mod periodic;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use pacer::FramePacer;
pub use periodic::PeriodicJob;
