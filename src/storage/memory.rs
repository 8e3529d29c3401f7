//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of the
//! `Storage` trait. It backs the server binary (optionally seeded from a
//! JSON file) and serves as the reference implementation in tests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::command::{CommandCompletion, CommandId, CommandKind, ExternalCommand};
use crate::entity::{BuildRecord, BuildStatus, EntityId, VersionId};
use crate::storage::traits::{CrashReport, KillReport, LiveStats, Storage};
use crate::error::StorageError;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Initial content of an `InMemoryStorage`, as read from a seed file.
///
/// ```json
/// {
///   "entities": [{"id": 1, "version_id": 10, "build_status": "successful", "program": "grazer"}],
///   "active": [1],
///   "commands": [{"id": 1, "kind": "kill", "target": 1}]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSeed {
    #[serde(default)]
    pub entities: Vec<BuildRecord>,
    #[serde(default)]
    pub active: Vec<EntityId>,
    #[serde(default)]
    pub commands: Vec<ExternalCommand>,
}

#[derive(Debug)]
struct StoredCommand {
    command: ExternalCommand,
    completion: Option<CommandCompletion>,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<EntityId, BuildRecord>,
    active: Vec<EntityId>,
    commands: BTreeMap<CommandId, StoredCommand>,
    next_command: i64,
    kills: Vec<KillReport>,
    crashes: Vec<CrashReport>,
    persisted: HashMap<EntityId, Vec<u8>>,
    live_stats: Vec<LiveStats>,
}

/// Thread-safe in-memory `Storage`.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: RwLock<State>,
    offline: AtomicBool,
}

impl InMemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage holding `seed`.
    #[must_use]
    pub fn from_seed(seed: StorageSeed) -> Self {
        let mut state = State::default();
        for record in seed.entities {
            state.records.insert(record.id, record);
        }
        state.active = seed.active;
        for command in seed.commands {
            state.next_command = state.next_command.max(command.id.get());
            state.commands.insert(
                command.id,
                StoredCommand {
                    command,
                    completion: None,
                },
            );
        }
        Self {
            state: RwLock::new(state),
            offline: AtomicBool::new(false),
        }
    }

    /// Reads a JSON seed file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `SerializationError` if it is not a
    /// valid seed.
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let bytes = std::fs::read(path)?;
        let seed: StorageSeed =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        Ok(Self::from_seed(seed))
    }

    /// Makes `connect` fail as if the backend were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Inserts or replaces a build record.
    pub fn upsert_record(&self, record: BuildRecord) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("upsert_record"))?;
        state.records.insert(record.id, record);
        Ok(())
    }

    /// Marks an entity as externally active.
    pub fn activate(&self, id: EntityId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("activate"))?;
        if !state.active.contains(&id) {
            state.active.push(id);
        }
        Ok(())
    }

    /// Removes an entity from the active list.
    pub fn deactivate(&self, id: EntityId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("deactivate"))?;
        state.active.retain(|a| *a != id);
        Ok(())
    }

    /// Queues a command and returns its id.
    pub fn push_command(&self, kind: CommandKind, target: EntityId) -> Result<CommandId, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("push_command"))?;
        state.next_command += 1;
        let id = CommandId::new(state.next_command);
        state.commands.insert(
            id,
            StoredCommand {
                command: ExternalCommand { id, kind, target },
                completion: None,
            },
        );
        Ok(id)
    }

    /// Terminal state of a command, if it has been completed.
    pub fn command_completion(&self, id: CommandId) -> Result<Option<CommandCompletion>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("command_completion"))?;
        Ok(state.commands.get(&id).and_then(|c| c.completion.clone()))
    }

    /// All recorded deaths, oldest first.
    pub fn kills(&self) -> Result<Vec<KillReport>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("kills"))?;
        Ok(state.kills.clone())
    }

    /// All crash reports, oldest first.
    pub fn crashes(&self) -> Result<Vec<CrashReport>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("crashes"))?;
        Ok(state.crashes.clone())
    }

    /// Last persisted state blob of an entity.
    pub fn persisted_state(&self, id: EntityId) -> Result<Option<Vec<u8>>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("persisted_state"))?;
        Ok(state.persisted.get(&id).cloned())
    }

    /// Every live-stats record pushed so far, oldest first.
    pub fn live_stats(&self) -> Result<Vec<LiveStats>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("live_stats"))?;
        Ok(state.live_stats.clone())
    }
}

impl Storage for InMemoryStorage {
    fn connect(&self) -> Result<(), StorageError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(StorageError::ConnectionError("in-memory backend is offline".to_string()));
        }
        Ok(())
    }

    fn active_external_ids(&self) -> Result<Vec<EntityId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("active_external_ids"))?;
        Ok(state.active.clone())
    }

    fn entity_build_record(&self, id: EntityId) -> Result<Option<BuildRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity_build_record"))?;
        let Some(record) = state.records.get(&id) else {
            return Ok(None);
        };
        let mut record = record.clone();
        if let Some(blob) = state.persisted.get(&id) {
            record.persistent_state = blob.clone();
        }
        Ok(Some(record))
    }

    fn pending_commands(&self) -> Result<Vec<ExternalCommand>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("pending_commands"))?;
        Ok(state
            .commands
            .values()
            .filter(|c| c.completion.is_none())
            .map(|c| c.command.clone())
            .collect())
    }

    fn complete_command(&self, id: CommandId, success: bool, reason: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("complete_command"))?;
        let stored = state.commands.get_mut(&id).ok_or(StorageError::CommandNotFound(id.get()))?;
        stored.completion = Some(CommandCompletion {
            success,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn report_kill(&self, report: &KillReport) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("report_kill"))?;
        state.kills.push(report.clone());
        Ok(())
    }

    fn persist_entity_state(&self, id: EntityId, blob: &[u8]) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("persist_entity_state"))?;
        state.persisted.insert(id, blob.to_vec());
        Ok(())
    }

    fn mark_crashed(&self, version_id: VersionId, message: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("mark_crashed"))?;
        // A crashed version is not rebuilt until a new version replaces it.
        for record in state.records.values_mut() {
            if record.version_id == version_id {
                record.build_status = BuildStatus::Crashed;
            }
        }
        state.crashes.push(CrashReport {
            version_id,
            message: message.to_string(),
        });
        Ok(())
    }

    fn push_live_stats(&self, stats: &LiveStats) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("push_live_stats"))?;
        state.live_stats.push(stats.clone());
        Ok(())
    }
}
