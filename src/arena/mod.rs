//! Reference simulation.
//!
//! `Arena` implements the `Simulation` contract with a deliberately small
//! resource model: natural food regenerates into a shared pool, killed
//! agents leave remains that decay and eventually expire, and each active
//! agent's program requests an appetite once per tick. Entity startup and
//! teardown go through a `Limbo` backed by the lifecycle pipeline.

pub mod agent;
pub mod program;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, warn};

use crate::entity::{BuildRecord, EntityId, Frame, Lifecycle, SimEntity};
use crate::error::{InitError, LifecycleError, SpawnError};
use crate::lifecycle::{LifecyclePipeline, PipelineConfig, QueueStats};
use crate::limbo::{Limbo, LimboEvent};
use crate::simulation::{MassTotals, Roster, SimEvent, Simulation};
use crate::update::{
    EntityView, JsonUpdateEncoder, KillNotice, LogLine, StreamStats, UpdateEncoder, WorldDelta, WorldSnapshot,
};

pub use agent::Agent;
pub use program::{BuiltinLoader, Grazer, Program, ProgramLoader, StepOutcome, StepView};

/// Tuning of the arena's resource model.
#[derive(Debug, Clone, PartialEq)]
pub struct ArenaConfig {
    /// Natural food added to the pool each tick.
    pub natural_food_per_tick: f64,
    /// Upper bound of the natural food pool.
    pub natural_food_cap: f64,
    /// Fraction of every remains' mass lost per tick.
    pub remains_decay: f64,
    /// Remains lighter than this are removed.
    pub remains_expire_below: f64,
    /// Mass of a newly admitted agent.
    pub initial_mass: f64,
    /// Reported to observers in the snapshot.
    pub frames_per_second: u32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            natural_food_per_tick: 0.5,
            natural_food_cap: 500.0,
            remains_decay: 0.01,
            remains_expire_below: 0.05,
            initial_mass: 1.0,
            frames_per_second: 60,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Remains {
    mass: f64,
    killer: Option<EntityId>,
}

/// Reference simulation driven by pluggable programs.
pub struct Arena<L: ProgramLoader, U: UpdateEncoder = JsonUpdateEncoder> {
    config: ArenaConfig,
    loader: L,
    encoder: U,
    frame: Frame,
    active: BTreeMap<EntityId, Arc<Agent>>,
    limbo: Limbo<Agent>,
    natural_food: f64,
    remains: Vec<Remains>,
    appetite: HashMap<EntityId, f64>,
    pending_log: Vec<LogLine>,
    events: Vec<SimEvent<Agent>>,
    delta: WorldDelta,
}

impl<L: ProgramLoader> Arena<L> {
    /// Creates an arena with the JSON update encoder.
    ///
    /// # Errors
    ///
    /// Returns `SpawnFailed` if the lifecycle workers could not be started.
    pub fn new(config: ArenaConfig, pipeline: &PipelineConfig, loader: L) -> Result<Self, LifecycleError> {
        Self::with_encoder(config, pipeline, loader, JsonUpdateEncoder)
    }
}

impl<L: ProgramLoader, U: UpdateEncoder> Arena<L, U> {
    /// Creates an arena with a custom update encoder.
    ///
    /// # Errors
    ///
    /// Returns `SpawnFailed` if the lifecycle workers could not be started.
    pub fn with_encoder(config: ArenaConfig, pipeline: &PipelineConfig, loader: L, encoder: U) -> Result<Self, LifecycleError> {
        let limbo = Limbo::new(LifecyclePipeline::start(pipeline)?);
        Ok(Self {
            config,
            loader,
            encoder,
            frame: 0,
            active: BTreeMap::new(),
            limbo,
            natural_food: 0.0,
            remains: Vec::new(),
            appetite: HashMap::new(),
            pending_log: Vec::new(),
            events: Vec::new(),
            delta: WorldDelta::default(),
        })
    }

    /// Food currently in the natural pool.
    #[must_use]
    pub fn natural_food(&self) -> f64 {
        self.natural_food
    }

    /// Number of entities entering the simulation.
    #[must_use]
    pub fn entering_count(&self) -> usize {
        self.limbo.entering_count()
    }

    /// Number of entities being torn down.
    #[must_use]
    pub fn leaving_count(&self) -> usize {
        self.limbo.leaving_count()
    }

    fn view(agent: &Agent) -> EntityView {
        EntityView {
            id: agent.external_id(),
            mass: agent.mass(),
            start_frame: agent.start_frame(),
        }
    }

    fn dead_mass(&self) -> f64 {
        self.remains.iter().map(|r| r.mass).sum()
    }
}

impl<L: ProgramLoader, U: UpdateEncoder> Roster for Arena<L, U> {
    type Entity = Agent;

    fn new_entity(&mut self, record: BuildRecord) -> Result<Arc<Agent>, SpawnError> {
        let program = self.loader.load(&record).map_err(|message| InitError {
            id: record.id,
            version_id: record.version_id,
            message,
        })?;

        let agent = Arc::new(Agent::new(&record, program, self.config.initial_mass));
        self.limbo.enter(Arc::clone(&agent))?;
        debug!("entity {} (version {}) queued for startup", record.id, record.version_id);
        Ok(agent)
    }

    fn kill_entity(&mut self, victim: &Arc<Agent>, killer: Option<&Arc<Agent>>) {
        let id = victim.external_id();
        if self.active.remove(&id).is_none() {
            return;
        }
        self.appetite.remove(&id);

        let killer_id = killer.map(|k| k.external_id());
        self.remains.push(Remains {
            mass: victim.mass(),
            killer: killer_id.filter(|k| *k != id),
        });
        victim.capture_persistent_state();

        self.delta.killed.push(KillNotice { victim: id, killer: killer_id });
        self.events.push(SimEvent::Killed {
            victim: Arc::clone(victim),
            killer: killer.cloned(),
            frame: self.frame,
        });

        if let Err(e) = self.limbo.leave(Arc::clone(victim)) {
            warn!("could not schedule teardown of entity {id}: {e}");
        }
    }

    fn active_entities(&self) -> Vec<Arc<Agent>> {
        self.active.values().cloned().collect()
    }

    fn active_count(&self) -> usize {
        self.active.len()
    }

    fn is_external_id_active(&self, id: EntityId) -> bool {
        self.active.contains_key(&id) || self.limbo.contains(id)
    }

    fn entity_by_external_id(&self, id: EntityId) -> Option<Arc<Agent>> {
        self.active.get(&id).cloned()
    }
}

impl<L: ProgramLoader, U: UpdateEncoder> Simulation for Arena<L, U> {
    fn current_frame(&self) -> Frame {
        self.frame
    }

    fn decay_resources(&mut self) {
        self.natural_food = (self.natural_food + self.config.natural_food_per_tick).min(self.config.natural_food_cap);
        let keep = 1.0 - self.config.remains_decay;
        for remains in &mut self.remains {
            remains.mass *= keep;
        }
    }

    fn consume_resources(&mut self) {
        for (id, agent) in &self.active {
            let mut wanted = self.appetite.get(id).copied().unwrap_or(0.0);
            if wanted <= 0.0 {
                continue;
            }

            let (mut by_others, mut by_self) = (0.0, 0.0);
            for remains in &mut self.remains {
                if wanted <= 0.0 {
                    break;
                }
                let bite = remains.mass.min(wanted);
                remains.mass -= bite;
                wanted -= bite;
                if remains.killer == Some(*id) {
                    by_self += bite;
                } else {
                    by_others += bite;
                }
            }

            let natural = self.natural_food.min(wanted);
            self.natural_food -= natural;

            agent.feed(natural, by_others, by_self);
            self.delta.updated.push(Self::view(agent));
        }
    }

    fn remove_expired(&mut self) {
        let floor = self.config.remains_expire_below;
        self.remains.retain(|r| r.mass >= floor);
    }

    fn advance_entities(&mut self) {
        let mut crashed = Vec::new();
        for (id, agent) in &self.active {
            match agent.step(self.frame) {
                Ok(StepOutcome { appetite, log }) => {
                    self.appetite.insert(*id, appetite.max(0.0));
                    self.pending_log.extend(log.into_iter().map(|text| LogLine {
                        entity: *id,
                        frame: self.frame,
                        text,
                    }));
                }
                Err(message) => crashed.push((Arc::clone(agent), message)),
            }
        }

        for (agent, message) in crashed {
            warn!("entity {} crashed: {message}", agent.external_id());
            self.events.push(SimEvent::Errored {
                entity: Arc::clone(&agent),
                message,
            });
            self.kill_entity(&agent, None);
        }
    }

    fn publish_stream_stats(&mut self) {
        self.delta.stream_stats = Some(StreamStats {
            frame: self.frame,
            active_count: self.active.len(),
            mass: self.mass_totals(),
        });
    }

    fn process_log(&mut self) {
        self.delta.log.append(&mut self.pending_log);
    }

    fn tick(&mut self) {
        self.frame += 1;
    }

    fn update_transitional(&mut self) {
        for event in self.limbo.update() {
            match event {
                LimboEvent::Admitted(agent) => {
                    agent.admit(self.frame);
                    self.delta.spawned.push(Self::view(&agent));
                    self.active.insert(agent.external_id(), agent);
                }
                LimboEvent::StartupFailed { entity, message } => {
                    self.events.push(SimEvent::Errored { entity, message });
                }
                LimboEvent::Departed(_) | LimboEvent::ShutdownFailed { .. } => {}
            }
        }
    }

    fn transitional_count(&self) -> usize {
        self.limbo.len()
    }

    fn queue_stats(&self) -> QueueStats {
        self.limbo.queue_stats()
    }

    fn mass_totals(&self) -> MassTotals {
        MassTotals {
            living: self.active.values().map(|a| a.mass()).sum(),
            dead: self.dead_mass(),
        }
    }

    fn take_update(&mut self) -> Vec<u8> {
        let mut delta = std::mem::take(&mut self.delta);
        delta.frame = self.frame;
        self.encoder.encode_delta(&delta)
    }

    fn snapshot(&self) -> Vec<u8> {
        let snapshot = WorldSnapshot {
            frame: self.frame,
            frames_per_second: self.config.frames_per_second,
            entities: self.active.values().map(|a| Self::view(a)).collect(),
            natural_food: self.natural_food,
            mass: self.mass_totals(),
        };
        self.encoder.encode_snapshot(&snapshot)
    }

    fn drain_events(&mut self) -> Vec<SimEvent<Agent>> {
        std::mem::take(&mut self.events)
    }
}
