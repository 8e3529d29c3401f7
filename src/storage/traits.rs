//! Storage contract consumed by the core.
//!
//! The storage backend is the external source of truth: which entities
//! should be active, how to build them, and which commands are pending.
//! All calls happen on the simulation thread; implementations are
//! `Send + Sync` so a backend may be shared with surrounding glue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::{CommandId, ExternalCommand};
use crate::entity::{BuildRecord, EntityId, FoodConsumed, Frame, VersionId};
use crate::error::StorageError;

/// Killer id recorded when nobody else is responsible for a death.
pub const NO_KILLER: i64 = -1;

/// Everything recorded about one death.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillReport {
    pub victim: EntityId,
    pub version_id: VersionId,
    pub start_frame: Frame,
    pub end_frame: Frame,
    /// External id of the killer, or [`NO_KILLER`].
    pub killer_id: i64,
    pub peak_mass: f64,
    pub final_mass: f64,
    pub food: FoodConsumed,
}

/// Crash record filed against a program version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    pub version_id: VersionId,
    pub message: String,
}

/// Server-wide statistics written on the persisted-telemetry interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStats {
    pub recorded_at: DateTime<Utc>,
    /// Frames per second since the previous push; `None` on the first push.
    pub tick_rate: Option<f64>,
    pub frame: Frame,
    pub active_count: usize,
    pub startup_queue_len: usize,
    pub shutdown_queue_len: usize,
    pub living_mass: f64,
    pub dead_mass: f64,
}

/// External source of truth for the roster.
pub trait Storage: Send + Sync {
    /// Establishes the backend connection.
    fn connect(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Ids of entities that should be simulated.
    fn active_external_ids(&self) -> Result<Vec<EntityId>, StorageError>;

    /// Build record of an entity, if one exists.
    fn entity_build_record(&self, id: EntityId) -> Result<Option<BuildRecord>, StorageError>;

    /// Commands not yet completed.
    fn pending_commands(&self) -> Result<Vec<ExternalCommand>, StorageError>;

    /// Moves a command to its terminal state.
    fn complete_command(&self, id: CommandId, success: bool, reason: &str) -> Result<(), StorageError>;

    /// Records a death.
    fn report_kill(&self, report: &KillReport) -> Result<(), StorageError>;

    /// Stores an entity's durable state.
    fn persist_entity_state(&self, id: EntityId, blob: &[u8]) -> Result<(), StorageError>;

    /// Marks a program version as crashed.
    fn mark_crashed(&self, version_id: VersionId, message: &str) -> Result<(), StorageError>;

    /// Writes server-wide statistics.
    fn push_live_stats(&self, stats: &LiveStats) -> Result<(), StorageError>;
}

impl<T: Storage + ?Sized> Storage for Arc<T> {
    fn connect(&self) -> Result<(), StorageError> {
        (**self).connect()
    }

    fn active_external_ids(&self) -> Result<Vec<EntityId>, StorageError> {
        (**self).active_external_ids()
    }

    fn entity_build_record(&self, id: EntityId) -> Result<Option<BuildRecord>, StorageError> {
        (**self).entity_build_record(id)
    }

    fn pending_commands(&self) -> Result<Vec<ExternalCommand>, StorageError> {
        (**self).pending_commands()
    }

    fn complete_command(&self, id: CommandId, success: bool, reason: &str) -> Result<(), StorageError> {
        (**self).complete_command(id, success, reason)
    }

    fn report_kill(&self, report: &KillReport) -> Result<(), StorageError> {
        (**self).report_kill(report)
    }

    fn persist_entity_state(&self, id: EntityId, blob: &[u8]) -> Result<(), StorageError> {
        (**self).persist_entity_state(id, blob)
    }

    fn mark_crashed(&self, version_id: VersionId, message: &str) -> Result<(), StorageError> {
        (**self).mark_crashed(version_id, message)
    }

    fn push_live_stats(&self, stats: &LiveStats) -> Result<(), StorageError> {
        (**self).push_live_stats(stats)
    }
}
