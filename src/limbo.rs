//! Bookkeeping for entities between the simulation and the lifecycle pools.
//!
//! Entities enter limbo when created and stay there until their startup
//! result is drained; killed entities re-enter limbo until their teardown
//! result is drained. Only the simulation thread touches a `Limbo`.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::entity::{EntityId, Lifecycle};
use crate::error::LifecycleError;
use crate::lifecycle::{LifecyclePipeline, LifecycleResult, QueueStats, TaskKind};

/// What happened to an entity in limbo during one drain.
pub enum LimboEvent<E> {
    /// Startup succeeded; the entity may join the simulation.
    Admitted(Arc<E>),
    /// Startup failed; the entity must be discarded.
    StartupFailed { entity: Arc<E>, message: String },
    /// Teardown finished.
    Departed(Arc<E>),
    /// Teardown failed; the entity is gone regardless.
    ShutdownFailed { entity: Arc<E>, message: String },
}

/// Entities whose startup or teardown is in flight.
pub struct Limbo<E: Lifecycle> {
    pipeline: LifecyclePipeline<E>,
    entering: HashMap<EntityId, Arc<E>>,
    leaving: HashMap<EntityId, Arc<E>>,
}

impl<E: Lifecycle> Limbo<E> {
    /// Wraps a running pipeline.
    #[must_use]
    pub fn new(pipeline: LifecyclePipeline<E>) -> Self {
        Self {
            pipeline,
            entering: HashMap::new(),
            leaving: HashMap::new(),
        }
    }

    /// Schedules startup of a new entity.
    ///
    /// # Errors
    ///
    /// `AlreadyInProgress` if the id still has work in either pool.
    pub fn enter(&mut self, entity: Arc<E>) -> Result<(), LifecycleError> {
        let id = entity.external_id();
        self.pipeline.enqueue_startup(Arc::clone(&entity))?;
        self.entering.insert(id, entity);
        Ok(())
    }

    /// Schedules teardown of an entity that left the simulation.
    ///
    /// # Errors
    ///
    /// `AlreadyInProgress` if the id still has work in either pool.
    pub fn leave(&mut self, entity: Arc<E>) -> Result<(), LifecycleError> {
        let id = entity.external_id();
        self.pipeline.enqueue_shutdown(Arc::clone(&entity))?;
        self.leaving.insert(id, entity);
        Ok(())
    }

    /// True if the id is entering, leaving, or has unretrieved work.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entering.contains_key(&id) || self.leaving.contains_key(&id) || self.pipeline.is_in_progress(id)
    }

    /// Number of entities entering.
    #[must_use]
    pub fn entering_count(&self) -> usize {
        self.entering.len()
    }

    /// Number of entities leaving.
    #[must_use]
    pub fn leaving_count(&self) -> usize {
        self.leaving.len()
    }

    /// Entities entering plus entities leaving.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entering.len() + self.leaving.len()
    }

    /// True if nothing is entering or leaving.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending-queue lengths of both pools.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.pipeline.queue_stats()
    }

    /// Drains every result available right now. Never blocks.
    pub fn update(&mut self) -> Vec<LimboEvent<E>> {
        let mut events = Vec::new();

        while let Some(result) = self.pipeline.try_startup_result() {
            events.push(self.settle(result));
        }
        while let Some(result) = self.pipeline.try_shutdown_result() {
            events.push(self.settle(result));
        }

        events
    }

    fn settle(&mut self, result: LifecycleResult<E>) -> LimboEvent<E> {
        let id = result.entity.external_id();
        let LifecycleResult {
            entity,
            kind,
            success,
            message,
        } = result;

        match kind {
            TaskKind::Startup => {
                self.entering.remove(&id);
                if success {
                    debug!("entity {id} started");
                    LimboEvent::Admitted(entity)
                } else {
                    warn!("entity {id} failed to start: {message}");
                    LimboEvent::StartupFailed { entity, message }
                }
            }
            TaskKind::Shutdown => {
                self.leaving.remove(&id);
                if success {
                    debug!("entity {id} shut down");
                    LimboEvent::Departed(entity)
                } else {
                    warn!("entity {id} failed to shut down cleanly: {message}");
                    LimboEvent::ShutdownFailed { entity, message }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::error::TaskError;
    use crate::lifecycle::PipelineConfig;

    struct Stub {
        id: EntityId,
        start_ok: bool,
    }

    impl Lifecycle for Stub {
        fn external_id(&self) -> EntityId {
            self.id
        }

        fn startup(&self) -> Result<(), TaskError> {
            if self.start_ok {
                Ok(())
            } else {
                Err(TaskError::new("refused"))
            }
        }

        fn shutdown(&self) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn drain_until<E: Lifecycle>(limbo: &mut Limbo<E>, want: usize) -> Vec<LimboEvent<E>> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        while out.len() < want {
            out.extend(limbo.update());
            assert!(Instant::now() < deadline, "timed out draining limbo");
            std::thread::sleep(Duration::from_millis(2));
        }
        out
    }

    #[test]
    fn entity_passes_through_limbo_both_ways() {
        let pipeline = LifecyclePipeline::start(&PipelineConfig { startup_workers: 2 }).unwrap();
        let mut limbo = Limbo::new(pipeline);
        let stub = Arc::new(Stub {
            id: EntityId::new(1),
            start_ok: true,
        });

        limbo.enter(Arc::clone(&stub)).unwrap();
        assert!(limbo.contains(EntityId::new(1)));
        assert_eq!(limbo.entering_count(), 1);

        let events = drain_until(&mut limbo, 1);
        assert!(matches!(events[0], LimboEvent::Admitted(_)));
        assert!(!limbo.contains(EntityId::new(1)));

        limbo.leave(stub).unwrap();
        assert_eq!(limbo.leaving_count(), 1);
        let events = drain_until(&mut limbo, 1);
        assert!(matches!(events[0], LimboEvent::Departed(_)));
        assert!(limbo.is_empty());
    }

    #[test]
    fn failed_startup_is_reported_with_message() {
        let pipeline = LifecyclePipeline::start(&PipelineConfig::default()).unwrap();
        let mut limbo = Limbo::new(pipeline);
        limbo
            .enter(Arc::new(Stub {
                id: EntityId::new(2),
                start_ok: false,
            }))
            .unwrap();

        let events = drain_until(&mut limbo, 1);
        let LimboEvent::StartupFailed { message, .. } = &events[0] else {
            panic!("expected StartupFailed");
        };
        assert_eq!(message, "refused");
        assert!(limbo.is_empty());
    }
}
