//! Entity identity and the traits the core needs from simulated entities.
//!
//! Entities are owned by the simulation. The core only holds shared
//! handles (`Arc<E>`) to them, so a worker executing a lifecycle task keeps
//! its entity alive even if the simulation has already let go of it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Frame counter value.
pub type Frame = u64;

/// External (storage-assigned) entity identifier.
///
/// # Examples
///
/// ```
/// use arena_core::EntityId;
///
/// let id = EntityId::new(42);
/// assert_eq!(id.get(), 42);
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    /// Creates an entity ID from its external value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the external value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Identifier of the persisted record version an entity was built from.
///
/// Crash reports are filed against the version, not the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(i64);

impl VersionId {
    /// Creates a version ID from its external value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the external value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build state of an entity's program as recorded in storage.
///
/// Only `Successful` records are admitted into the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BuildStatus {
    /// Program has not been built yet.
    NotCompiled,
    /// Program built and may be started.
    Successful,
    /// Program failed to build.
    Failed,
    /// Program was built but crashed at runtime.
    Crashed,
    /// Any other value written by the surrounding system.
    Other(String),
}

impl BuildStatus {
    /// Returns the storage representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotCompiled => "not_compiled",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Crashed => "crashed",
            Self::Other(s) => s,
        }
    }

    /// Returns true if the entity may be created from this record.
    #[must_use]
    pub const fn is_successful(&self) -> bool {
        matches!(self, Self::Successful)
    }
}

impl From<&str> for BuildStatus {
    fn from(s: &str) -> Self {
        match s {
            "not_compiled" => Self::NotCompiled,
            "successful" => Self::Successful,
            "failed" => Self::Failed,
            "crashed" => Self::Crashed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for BuildStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<BuildStatus> for String {
    fn from(status: BuildStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything storage knows about an entity that is needed to create it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// External identifier.
    pub id: EntityId,
    /// Record version the program was built from.
    pub version_id: VersionId,
    /// Gate for creation.
    pub build_status: BuildStatus,
    /// Opaque program reference handed to the simulation's loader.
    #[serde(default)]
    pub program: String,
    /// Durable state persisted when the entity last died.
    #[serde(default)]
    pub persistent_state: Vec<u8>,
}

/// Breakdown of food an entity consumed during its life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FoodConsumed {
    /// Naturally spawned food.
    pub natural: f64,
    /// Remains of entities killed by someone else.
    pub hunted_by_others: f64,
    /// Remains of entities this entity killed.
    pub hunted_by_self: f64,
}

impl FoodConsumed {
    /// Total food consumed from all sources.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.natural + self.hunted_by_others + self.hunted_by_self
    }
}

/// Mass counters of a single entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStats {
    /// Largest mass reached so far.
    pub peak_mass: f64,
    /// Current mass.
    pub mass: f64,
    /// Food consumption breakdown.
    pub food: FoodConsumed,
}

/// Startup and shutdown work executed off the simulation thread.
///
/// Implementations run on lifecycle worker threads. Returning `Err`
/// yields a failed `LifecycleResult` carrying the error text.
pub trait Lifecycle: Send + Sync + 'static {
    /// External identifier, used for in-progress tracking.
    fn external_id(&self) -> EntityId;

    /// Initializes the entity. May be slow.
    fn startup(&self) -> Result<(), TaskError>;

    /// Releases the entity's resources. May be slow.
    fn shutdown(&self) -> Result<(), TaskError>;
}

/// Read access the core needs to report on a simulated entity.
pub trait SimEntity: Lifecycle {
    /// Record version the entity was built from.
    fn version_id(&self) -> VersionId;

    /// Frame at which the entity entered the simulation.
    fn start_frame(&self) -> Frame;

    /// Current mass counters.
    fn stats(&self) -> EntityStats;

    /// Durable state blob to persist when the entity dies.
    fn persistent_state(&self) -> Vec<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_status_round_trips_known_values() {
        for s in ["not_compiled", "successful", "failed", "crashed"] {
            assert_eq!(BuildStatus::from(s).as_str(), s);
        }
        assert!(BuildStatus::from("successful").is_successful());
        assert!(!BuildStatus::from("failed").is_successful());
    }

    #[test]
    fn build_status_keeps_unknown_values() {
        let status = BuildStatus::from("queued");
        assert_eq!(status, BuildStatus::Other("queued".to_string()));
        assert!(!status.is_successful());
    }

    #[test]
    fn build_record_deserializes_with_defaults() {
        let record: BuildRecord = serde_json::from_str(
            r#"{"id": 5, "version_id": 50, "build_status": "successful"}"#,
        )
        .unwrap();
        assert_eq!(record.id, EntityId::new(5));
        assert_eq!(record.version_id, VersionId::new(50));
        assert!(record.build_status.is_successful());
        assert!(record.program.is_empty());
        assert!(record.persistent_state.is_empty());
    }

    #[test]
    fn food_total_sums_sources() {
        let food = FoodConsumed {
            natural: 1.5,
            hunted_by_others: 2.0,
            hunted_by_self: 0.5,
        };
        assert!((food.total() - 4.0).abs() < f64::EPSILON);
    }
}
