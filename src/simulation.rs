//! Contracts between the core and the simulation it drives.
//!
//! The simulation owns entities, physics and the differential update
//! feed. The core only calls the operations below, always from the
//! simulation thread.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{BuildRecord, EntityId, Frame, SimEntity};
use crate::error::SpawnError;
use crate::lifecycle::QueueStats;

/// Lifecycle event raised by the simulation and drained by the core.
pub enum SimEvent<E> {
    /// `victim` left the simulation. `killer` is `None` for environmental
    /// deaths; self-elimination passes the victim itself.
    Killed {
        victim: Arc<E>,
        killer: Option<Arc<E>>,
        frame: Frame,
    },
    /// The entity's program failed.
    Errored {
        entity: Arc<E>,
        message: String,
    },
}

impl<E: SimEntity> std::fmt::Debug for SimEvent<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Killed { victim, killer, frame } => f
                .debug_struct("Killed")
                .field("victim", &victim.external_id())
                .field("killer", &killer.as_ref().map(|k| k.external_id()))
                .field("frame", frame)
                .finish(),
            Self::Errored { entity, message } => f
                .debug_struct("Errored")
                .field("entity", &entity.external_id())
                .field("message", message)
                .finish(),
        }
    }
}

/// Aggregate mass of living entities and of remains still in the world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MassTotals {
    /// Sum of the masses of active entities.
    pub living: f64,
    /// Mass left behind by dead entities.
    pub dead: f64,
}

/// Roster operations used by reconciliation and bootstrap.
pub trait Roster {
    /// Entity handle type.
    type Entity: SimEntity;

    /// Creates an entity from its build record and schedules its startup.
    ///
    /// # Errors
    ///
    /// `SpawnError::Init` when the entity's own initialization fails; the
    /// caller reports it as a crash.
    fn new_entity(&mut self, record: BuildRecord) -> Result<Arc<Self::Entity>, SpawnError>;

    /// Removes `victim` from the simulation, raising a `Killed` event.
    fn kill_entity(&mut self, victim: &Arc<Self::Entity>, killer: Option<&Arc<Self::Entity>>);

    /// Entities currently simulated.
    fn active_entities(&self) -> Vec<Arc<Self::Entity>>;

    /// Number of entities currently simulated.
    fn active_count(&self) -> usize {
        self.active_entities().len()
    }

    /// True if the id is simulated or still entering/leaving.
    fn is_external_id_active(&self, id: EntityId) -> bool;

    /// Looks up an active entity.
    fn entity_by_external_id(&self, id: EntityId) -> Option<Arc<Self::Entity>>;
}

/// The full per-tick surface of a simulation.
pub trait Simulation: Roster {
    /// Current frame counter.
    fn current_frame(&self) -> Frame;

    /// Ages environmental resources.
    fn decay_resources(&mut self);

    /// Lets entities consume resources.
    fn consume_resources(&mut self);

    /// Drops resources that have run out.
    fn remove_expired(&mut self);

    /// Advances every active entity's behavior one step.
    fn advance_entities(&mut self);

    /// Pushes live statistics into the observer feed.
    fn publish_stream_stats(&mut self);

    /// Moves deferred entity log output into the observer feed.
    fn process_log(&mut self);

    /// Advances the frame counter.
    fn tick(&mut self);

    /// Applies finished lifecycle work: admits started entities, discards
    /// failed ones, forgets torn-down ones.
    fn update_transitional(&mut self);

    /// Number of entities still entering or leaving.
    fn transitional_count(&self) -> usize;

    /// Pending-queue lengths of the lifecycle pools.
    fn queue_stats(&self) -> QueueStats;

    /// Living and dead mass.
    fn mass_totals(&self) -> MassTotals;

    /// Encodes and clears the differential update accumulated this tick.
    fn take_update(&mut self) -> Vec<u8>;

    /// Encodes the full world state for a newly connected observer.
    fn snapshot(&self) -> Vec<u8>;

    /// Takes every event raised since the last call.
    fn drain_events(&mut self) -> Vec<SimEvent<Self::Entity>>;
}
