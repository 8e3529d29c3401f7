//! Worker pools that drain a `TaskQueue` on background threads.
//!
//! Idle workers block on the pending channel (no polling). Stopping a pool
//! is cooperative: the stop flag is raised, blocked workers are woken by
//! closing a dedicated stop channel, and every worker is joined after its
//! in-flight task (if any) has run to completion.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, error, warn};

use crate::entity::Lifecycle;
use crate::error::LifecycleError;

use super::queue::{InProgressSet, TaskQueue, WorkerEnds};
use super::task::{LifecycleResult, LifecycleTask, TaskKind};

/// A fixed set of threads executing one kind of lifecycle task.
pub struct WorkerPool<E: Lifecycle> {
    queue: TaskQueue<E>,
    stop: Arc<AtomicBool>,
    wake_tx: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl<E: Lifecycle> WorkerPool<E> {
    /// Starts `workers` threads (at least one) draining a new queue for `kind`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnFailed` if a worker thread could not be created; any
    /// threads already started are stopped and joined.
    pub fn start(kind: TaskKind, workers: usize, in_progress: Arc<InProgressSet>) -> Result<Self, LifecycleError> {
        let workers = workers.max(1);
        let queue = TaskQueue::new(kind, in_progress);
        let stop = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = bounded::<()>(1);

        let mut pool = Self {
            queue,
            stop,
            wake_tx: Some(wake_tx),
            workers: Vec::with_capacity(workers),
        };

        for idx in 0..workers {
            let ends = pool.queue.worker_ends();
            let stop = Arc::clone(&pool.stop);
            let wake_rx = wake_rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("arena-{kind}-{idx}"))
                .spawn(move || worker_loop(kind, ends, &stop, &wake_rx));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.stop();
                    return Err(LifecycleError::SpawnFailed {
                        pool: kind.as_str().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(pool)
    }

    /// Kind of task this pool executes.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.queue.kind()
    }

    /// Number of worker threads still attached to the pool.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue the entity's task for execution.
    ///
    /// # Errors
    ///
    /// See [`TaskQueue::enqueue`].
    pub fn enqueue(&self, entity: Arc<E>) -> Result<(), LifecycleError> {
        self.queue.enqueue(entity)
    }

    /// Non-blocking retrieval of one completed result.
    pub fn try_dequeue_result(&self) -> Option<LifecycleResult<E>> {
        self.queue.try_dequeue_result()
    }

    /// Snapshot of the pending-queue length.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Raises the stop flag and joins every worker.
    ///
    /// In-flight tasks run to completion; queued tasks that no worker has
    /// picked up yet stay in the queue unexecuted.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Closing the wake channel unblocks idle workers.
        drop(self.wake_tx.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("{} worker exited by panic", self.queue.kind());
            }
        }
    }
}

impl<E: Lifecycle> Drop for WorkerPool<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<E: Lifecycle>(kind: TaskKind, ends: WorkerEnds<E>, stop: &AtomicBool, wake_rx: &Receiver<()>) {
    debug!("{kind} worker started");
    loop {
        let task = select! {
            recv(ends.tasks) -> msg => msg.ok(),
            recv(wake_rx) -> _ => None,
        };
        let Some(task) = task else {
            break;
        };
        // `select!` may pick a task over the closed wake channel.
        if stop.load(Ordering::Acquire) {
            if ends.requeue.send(task).is_err() {
                warn!("{kind} task dropped while stopping");
            }
            break;
        }

        if ends.results.send(execute(task)).is_err() {
            break;
        }
    }
    debug!("{kind} worker stopped");
}

/// Runs the task's operation and converts its outcome into a result.
///
/// Business failures (`TaskError`) become `{success: false, message}`.
/// Panics are caught here as well and reported the same way, prefixed with
/// `task panicked: `, so a faulty entity can never take down a worker.
pub(crate) fn execute<E: Lifecycle>(task: LifecycleTask<E>) -> LifecycleResult<E> {
    let LifecycleTask { entity, kind } = task;
    let id = entity.external_id();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match kind {
        TaskKind::Startup => entity.startup(),
        TaskKind::Shutdown => entity.shutdown(),
    }));

    match outcome {
        Ok(Ok(())) => LifecycleResult::succeeded(entity, kind),
        Ok(Err(err)) => {
            warn!("{kind} of entity {id} failed: {err}");
            LifecycleResult::failed(entity, kind, err.message())
        }
        Err(payload) => {
            let message = format!("task panicked: {}", panic_message(payload.as_ref()));
            error!("{kind} of entity {id}: {message}");
            LifecycleResult::failed(entity, kind, message)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
