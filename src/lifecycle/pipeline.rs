//! Startup and shutdown pools behind one in-progress set.
//!
//! Startup work for distinct entities is independent, so it runs on
//! several workers. Teardown may release shared resources and runs on a
//! single worker, serializing every shutdown task.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, Lifecycle};
use crate::error::LifecycleError;

use super::pool::WorkerPool;
use super::queue::InProgressSet;
use super::task::{LifecycleResult, TaskKind};

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of startup workers.
    pub startup_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { startup_workers: 4 }
    }
}

/// Pending-queue lengths of both pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Startup tasks not yet picked up.
    pub startup_pending: usize,
    /// Shutdown tasks not yet picked up.
    pub shutdown_pending: usize,
}

/// Background execution of entity startup and shutdown work.
pub struct LifecyclePipeline<E: Lifecycle> {
    in_progress: Arc<InProgressSet>,
    startup: WorkerPool<E>,
    shutdown: WorkerPool<E>,
}

impl<E: Lifecycle> LifecyclePipeline<E> {
    /// Number of shutdown workers. Teardown is always serialized.
    pub const SHUTDOWN_WORKERS: usize = 1;

    /// Starts both pools.
    ///
    /// # Errors
    ///
    /// Returns `SpawnFailed` if a worker thread could not be created.
    pub fn start(config: &PipelineConfig) -> Result<Self, LifecycleError> {
        let in_progress = Arc::new(InProgressSet::new());
        let startup = WorkerPool::start(TaskKind::Startup, config.startup_workers, Arc::clone(&in_progress))?;
        let shutdown = WorkerPool::start(TaskKind::Shutdown, Self::SHUTDOWN_WORKERS, Arc::clone(&in_progress))?;
        Ok(Self {
            in_progress,
            startup,
            shutdown,
        })
    }

    /// Queues initialization of `entity`.
    ///
    /// # Errors
    ///
    /// `AlreadyInProgress` if the entity already has work in either pool.
    pub fn enqueue_startup(&self, entity: Arc<E>) -> Result<(), LifecycleError> {
        self.startup.enqueue(entity)
    }

    /// Queues teardown of `entity`.
    ///
    /// # Errors
    ///
    /// `AlreadyInProgress` if the entity already has work in either pool.
    pub fn enqueue_shutdown(&self, entity: Arc<E>) -> Result<(), LifecycleError> {
        self.shutdown.enqueue(entity)
    }

    /// Non-blocking retrieval of one startup result.
    pub fn try_startup_result(&self) -> Option<LifecycleResult<E>> {
        self.startup.try_dequeue_result()
    }

    /// Non-blocking retrieval of one shutdown result.
    pub fn try_shutdown_result(&self) -> Option<LifecycleResult<E>> {
        self.shutdown.try_dequeue_result()
    }

    /// Returns true if `id` is queued, executing, or awaiting retrieval.
    #[must_use]
    pub fn is_in_progress(&self, id: EntityId) -> bool {
        self.in_progress.contains(id)
    }

    /// Number of entities with work in progress across both pools.
    #[must_use]
    pub fn in_progress_count(&self) -> usize {
        self.in_progress.len()
    }

    /// Number of startup workers.
    #[must_use]
    pub fn startup_workers(&self) -> usize {
        self.startup.worker_count()
    }

    /// Pending-queue length snapshot for both pools.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        QueueStats {
            startup_pending: self.startup.pending_count(),
            shutdown_pending: self.shutdown.pending_count(),
        }
    }

    /// Stops both pools, waiting for in-flight tasks to finish.
    pub fn stop(&mut self) {
        self.startup.stop();
        self.shutdown.stop();
    }
}
