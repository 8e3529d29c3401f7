//! Pending/result queues and in-progress tracking for lifecycle work.
//!
//! A `TaskQueue` pairs a blocking FIFO of pending tasks (drained by worker
//! threads) with a FIFO of completed results (drained by the simulation
//! thread, never blocking). Entity ids are tracked in an `InProgressSet`
//! from enqueue until their result is retrieved.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;

use crate::entity::{EntityId, Lifecycle};
use crate::error::LifecycleError;

use super::task::{LifecycleResult, LifecycleTask, TaskKind};

/// Ids of entities whose lifecycle work is queued, executing, or awaiting
/// retrieval.
///
/// Owned by a pipeline instance and shared with its queues.
#[derive(Debug, Default)]
pub struct InProgressSet {
    ids: Mutex<HashSet<EntityId>>,
}

impl InProgressSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section is a single insert/remove/lookup, so a poisoned
    // lock still guards a consistent set.
    fn guard(&self) -> MutexGuard<'_, HashSet<EntityId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `id`; returns false if it was already a member.
    pub(crate) fn try_insert(&self, id: EntityId) -> bool {
        self.guard().insert(id)
    }

    pub(crate) fn remove(&self, id: EntityId) -> bool {
        self.guard().remove(&id)
    }

    /// Returns true if `id` has lifecycle work in progress.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.guard().contains(&id)
    }

    /// Number of ids currently in progress.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Returns true if no work is in progress.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

/// Worker-facing ends of a `TaskQueue`.
pub(crate) struct WorkerEnds<E> {
    pub(crate) tasks: Receiver<LifecycleTask<E>>,
    /// Returns a task picked up after the pool was told to stop.
    pub(crate) requeue: Sender<LifecycleTask<E>>,
    pub(crate) results: Sender<LifecycleResult<E>>,
}

/// Thread-safe pending-task FIFO plus completed-result FIFO.
pub struct TaskQueue<E> {
    kind: TaskKind,
    pending_tx: Sender<LifecycleTask<E>>,
    pending_rx: Receiver<LifecycleTask<E>>,
    results_tx: Sender<LifecycleResult<E>>,
    results_rx: Receiver<LifecycleResult<E>>,
    in_progress: Arc<InProgressSet>,
}

impl<E: Lifecycle> TaskQueue<E> {
    /// Creates a queue for `kind` tasks sharing the given in-progress set.
    #[must_use]
    pub fn new(kind: TaskKind, in_progress: Arc<InProgressSet>) -> Self {
        let (pending_tx, pending_rx) = unbounded();
        let (results_tx, results_rx) = unbounded();
        Self {
            kind,
            pending_tx,
            pending_rx,
            results_tx,
            results_rx,
            in_progress,
        }
    }

    /// Kind of task this queue carries.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Marks the entity in progress and appends a task for it.
    ///
    /// # Errors
    ///
    /// - `AlreadyInProgress` if the entity's id is already a member of the
    ///   in-progress set (in this queue or a sibling sharing the set).
    /// - `Disconnected` if the pending channel was closed.
    pub fn enqueue(&self, entity: Arc<E>) -> Result<(), LifecycleError> {
        let id = entity.external_id();
        if !self.in_progress.try_insert(id) {
            return Err(LifecycleError::AlreadyInProgress { id });
        }

        if self.pending_tx.send(LifecycleTask::new(entity, self.kind)).is_err() {
            self.in_progress.remove(id);
            return Err(LifecycleError::Disconnected {
                pool: self.kind.as_str().to_string(),
            });
        }

        debug!("{} input queue length: {}", self.kind, self.pending_count());
        Ok(())
    }

    /// Retrieves one completed result without blocking.
    ///
    /// Retrieval ends the entity's in-progress membership.
    pub fn try_dequeue_result(&self) -> Option<LifecycleResult<E>> {
        let result = self.results_rx.try_recv().ok()?;
        self.in_progress.remove(result.entity.external_id());
        Some(result)
    }

    /// Snapshot of the number of tasks not yet picked up by a worker.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_rx.len()
    }

    /// Snapshot of the number of results awaiting retrieval.
    #[must_use]
    pub fn result_count(&self) -> usize {
        self.results_rx.len()
    }

    pub(crate) fn worker_ends(&self) -> WorkerEnds<E> {
        WorkerEnds {
            tasks: self.pending_rx.clone(),
            requeue: self.pending_tx.clone(),
            results: self.results_tx.clone(),
        }
    }
}
