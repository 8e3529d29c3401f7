//! Error types for the arena core.
//!
//! All errors are strongly typed using thiserror, one enum per concern,
//! with `ArenaError` as the top-level type the orchestrator returns.

use thiserror::Error;

use crate::entity::{EntityId, VersionId};

/// Business-level failure raised by an entity's startup or shutdown work.
///
/// Worker threads convert this into a failed `LifecycleResult`; it never
/// terminates a worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    /// Creates a task error carrying the given failure text.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the failure text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure reported by the simulation when a new entity cannot be initialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entity {id} (version {version_id}) failed to initialize: {message}")]
pub struct InitError {
    /// External identifier of the entity.
    pub id: EntityId,
    /// Record version the crash is reported against.
    pub version_id: VersionId,
    /// Failure text.
    pub message: String,
}

/// Failure to bring a new entity into the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The entity's own initialization failed; reported as a crash.
    #[error(transparent)]
    Init(#[from] InitError),

    /// Startup work could not be scheduled.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Errors raised while submitting lifecycle work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Entity {id} already has lifecycle work in progress")]
    AlreadyInProgress {
        id: EntityId,
    },

    #[error("Lifecycle pool '{pool}' is disconnected")]
    Disconnected {
        pool: String,
    },

    #[error("Failed to spawn worker for pool '{pool}': {message}")]
    SpawnFailed {
        pool: String,
        message: String,
    },
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("Storage connection error: {0}")]
    ConnectionError(String),

    /// Command not found.
    #[error("Command not found: {0}")]
    CommandNotFound(i64),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Seed file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport errors for observer connections.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to listen on port {port}: {source}")]
    ListenFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport is not listening")]
    NotListening,

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the frame clock.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Waiting for frame deadline failed: {message}")]
    WaitFailed {
        message: String,
    },
}

/// Validation errors for configuration and input data.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Setting '{name}' has invalid value '{value}': {reason}")]
    InvalidSetting {
        name: String,
        value: String,
        reason: String,
    },
}

/// Top-level error type for the arena core.
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}

impl ArenaError {
    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if retrying the failed operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => matches!(e, StorageError::ConnectionError(_)),
            Self::Transport(e) => matches!(e, TransportError::Io(_)),
            Self::Schedule(_) => true,
            Self::Validation(_) | Self::Lifecycle(_) => false,
        }
    }
}

/// Result type alias for arena operations.
pub type ArenaResult<T> = Result<T, ArenaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_displays_message_verbatim() {
        let err = TaskError::new("bad init");
        assert_eq!(err.to_string(), "bad init");
        assert_eq!(err.message(), "bad init");
    }

    #[test]
    fn test_init_error_mentions_version() {
        let err = InitError {
            id: EntityId::new(7),
            version_id: VersionId::new(70),
            message: "no program".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("version 70"));
        assert!(msg.contains("no program"));
    }

    #[test]
    fn test_lifecycle_error_in_progress() {
        let err = LifecycleError::AlreadyInProgress { id: EntityId::new(3) };
        assert!(format!("{err}").contains("already has lifecycle work"));
    }

    #[test]
    fn test_arena_error_from_storage() {
        let err: ArenaError = StorageError::ConnectionError("refused".to_string()).into();
        assert!(err.is_storage());
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("refused"));
    }

    #[test]
    fn test_arena_error_from_validation_not_retryable() {
        let err: ArenaError = ValidationError::InvalidSetting {
            name: "ARENA_PORT".to_string(),
            value: "ninety".to_string(),
            reason: "not a number".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }
}
