//! Server configuration.
//!
//! Defaults suit a local server. Every setting can be overridden from the
//! environment; the server binary additionally applies its command-line
//! flags on top.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ValidationError;
use crate::lifecycle::PipelineConfig;

/// Port override.
pub const ENV_PORT: &str = "ARENA_PORT";
/// Frame rate override.
pub const ENV_FPS: &str = "ARENA_FPS";
/// Startup worker count override.
pub const ENV_STARTUP_WORKERS: &str = "ARENA_STARTUP_WORKERS";
/// Observer-feed statistics interval, in milliseconds.
pub const ENV_STREAM_STATS_MS: &str = "ARENA_STREAM_STATS_MS";
/// Persisted statistics interval, in milliseconds.
pub const ENV_STORAGE_STATS_MS: &str = "ARENA_STORAGE_STATS_MS";
/// Reconciliation interval, in milliseconds.
pub const ENV_RECONCILE_MS: &str = "ARENA_RECONCILE_MS";
/// Path of a JSON storage seed.
pub const ENV_SEED: &str = "ARENA_SEED";

/// Runtime configuration of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Observer listening port.
    pub port: u16,
    /// Simulation ticks per second.
    pub frames_per_second: u32,
    /// Parallel startup workers (at least one is always started).
    pub startup_workers: usize,
    /// Interval of the statistics pushed into the observer feed.
    pub stream_stats_interval: Duration,
    /// Interval of the statistics written to storage.
    pub storage_stats_interval: Duration,
    /// Interval between reconciliation passes.
    pub reconcile_interval: Duration,
    /// How long one transport poll may wait. Zero never blocks.
    pub poll_timeout: Duration,
    /// Seed file for the in-memory storage.
    pub seed_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9010,
            frames_per_second: 60,
            startup_workers: 4,
            stream_stats_interval: Duration::from_secs(1),
            storage_stats_interval: Duration::from_secs(1),
            reconcile_interval: Duration::from_secs(1),
            poll_timeout: Duration::ZERO,
            seed_path: None,
        }
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, ValidationError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ValidationError::InvalidSetting {
        name: name.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl ServerConfig {
    /// Defaults overridden from the process environment.
    ///
    /// # Errors
    ///
    /// `InvalidSetting` if a variable holds an unparsable or invalid value.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden from `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// `InvalidSetting` if a value is unparsable or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_PORT) {
            config.port = parse(ENV_PORT, &v)?;
        }
        if let Some(v) = lookup(ENV_FPS) {
            config.frames_per_second = parse(ENV_FPS, &v)?;
        }
        if let Some(v) = lookup(ENV_STARTUP_WORKERS) {
            config.startup_workers = parse(ENV_STARTUP_WORKERS, &v)?;
        }
        if let Some(v) = lookup(ENV_STREAM_STATS_MS) {
            config.stream_stats_interval = Duration::from_millis(parse(ENV_STREAM_STATS_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_STORAGE_STATS_MS) {
            config.storage_stats_interval = Duration::from_millis(parse(ENV_STORAGE_STATS_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_RECONCILE_MS) {
            config.reconcile_interval = Duration::from_millis(parse(ENV_RECONCILE_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_SEED) {
            if !v.is_empty() {
                config.seed_path = Some(PathBuf::from(v));
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants the server relies on.
    ///
    /// # Errors
    ///
    /// `InvalidSetting` naming the first offending setting.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.frames_per_second == 0 {
            return Err(ValidationError::InvalidSetting {
                name: "frames_per_second".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        for (name, interval) in [
            ("stream_stats_interval", self.stream_stats_interval),
            ("storage_stats_interval", self.storage_stats_interval),
            ("reconcile_interval", self.reconcile_interval),
        ] {
            if interval.is_zero() {
                return Err(ValidationError::InvalidSetting {
                    name: name.to_string(),
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Duration of one frame.
    #[must_use]
    pub fn frame_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.frames_per_second.max(1)))
    }

    /// Lifecycle pipeline settings.
    #[must_use]
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            startup_workers: self.startup_workers.max(1),
        }
    }
}
