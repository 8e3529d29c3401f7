//! Lifecycle tasks and their results.

use std::fmt;
use std::sync::Arc;

/// Which half of an entity's lifecycle a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Initialization before the entity joins the simulation.
    Startup,
    /// Teardown after the entity left the simulation.
    Shutdown,
}

impl TaskKind {
    /// Short name used for thread names and log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of lifecycle work. Consumed exactly once by a worker.
pub struct LifecycleTask<E> {
    /// Shared handle to the entity the work belongs to.
    pub entity: Arc<E>,
    /// Startup or shutdown.
    pub kind: TaskKind,
}

impl<E> LifecycleTask<E> {
    /// Creates a task for the given entity.
    #[must_use]
    pub fn new(entity: Arc<E>, kind: TaskKind) -> Self {
        Self { entity, kind }
    }
}

impl<E> fmt::Debug for LifecycleTask<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleTask").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// Outcome of one lifecycle task. Consumed exactly once when drained.
pub struct LifecycleResult<E> {
    /// Entity the task ran for.
    pub entity: Arc<E>,
    /// Startup or shutdown.
    pub kind: TaskKind,
    /// Whether the underlying operation completed normally.
    pub success: bool,
    /// Failure text; empty on success.
    pub message: String,
}

impl<E> LifecycleResult<E> {
    /// Result of a task that completed normally.
    #[must_use]
    pub fn succeeded(entity: Arc<E>, kind: TaskKind) -> Self {
        Self {
            entity,
            kind,
            success: true,
            message: String::new(),
        }
    }

    /// Result of a task whose operation failed.
    #[must_use]
    pub fn failed(entity: Arc<E>, kind: TaskKind, message: impl Into<String>) -> Self {
        Self {
            entity,
            kind,
            success: false,
            message: message.into(),
        }
    }
}

impl<E> fmt::Debug for LifecycleResult<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleResult")
            .field("kind", &self.kind)
            .field("success", &self.success)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
