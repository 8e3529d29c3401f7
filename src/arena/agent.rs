//! The arena's entity type.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::entity::{BuildRecord, EntityId, EntityStats, Frame, Lifecycle, SimEntity, VersionId};
use crate::error::TaskError;

use super::program::{Program, StepOutcome, StepView};

#[derive(Debug, Default)]
struct AgentState {
    start_frame: Frame,
    stats: EntityStats,
    persistent_state: Vec<u8>,
}

/// An entity driven by a `Program`.
///
/// The program lock is held by a worker for the whole of startup and
/// teardown; the simulation thread only takes it while the agent is active,
/// when no lifecycle task can be running.
pub struct Agent {
    id: EntityId,
    version_id: VersionId,
    program: Mutex<Box<dyn Program>>,
    state: Mutex<AgentState>,
}

impl Agent {
    /// Creates an agent with `initial_mass`.
    #[must_use]
    pub fn new(record: &BuildRecord, program: Box<dyn Program>, initial_mass: f64) -> Self {
        Self {
            id: record.id,
            version_id: record.version_id,
            program: Mutex::new(program),
            state: Mutex::new(AgentState {
                start_frame: 0,
                stats: EntityStats {
                    peak_mass: initial_mass,
                    mass: initial_mass,
                    food: Default::default(),
                },
                persistent_state: record.persistent_state.clone(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn program(&self) -> Result<MutexGuard<'_, Box<dyn Program>>, TaskError> {
        self.program
            .lock()
            .map_err(|_| TaskError::new("program state poisoned by an earlier panic"))
    }

    pub(crate) fn admit(&self, frame: Frame) {
        self.state().start_frame = frame;
    }

    pub(crate) fn step(&self, frame: Frame) -> Result<StepOutcome, String> {
        let view = StepView {
            frame,
            mass: self.state().stats.mass,
        };
        let mut program = self.program().map_err(|e| e.to_string())?;
        program.step(&view)
    }

    /// Credits consumed food and returns the new mass.
    pub(crate) fn feed(&self, natural: f64, hunted_by_others: f64, hunted_by_self: f64) -> f64 {
        let mut state = self.state();
        let food = &mut state.stats.food;
        food.natural += natural;
        food.hunted_by_others += hunted_by_others;
        food.hunted_by_self += hunted_by_self;
        state.stats.mass += natural + hunted_by_others + hunted_by_self;
        state.stats.peak_mass = state.stats.peak_mass.max(state.stats.mass);
        state.stats.mass
    }

    /// Copies the program's durable state so it can be persisted while the
    /// shutdown worker owns the program.
    pub(crate) fn capture_persistent_state(&self) {
        let Ok(program) = self.program() else {
            return;
        };
        let blob = program.persistent_state();
        drop(program);
        self.state().persistent_state = blob;
    }

    /// Current mass.
    #[must_use]
    pub fn mass(&self) -> f64 {
        self.state().stats.mass
    }
}

impl Lifecycle for Agent {
    fn external_id(&self) -> EntityId {
        self.id
    }

    fn startup(&self) -> Result<(), TaskError> {
        self.program()?.start()
    }

    fn shutdown(&self) -> Result<(), TaskError> {
        self.program()?.stop()
    }
}

impl SimEntity for Agent {
    fn version_id(&self) -> VersionId {
        self.version_id
    }

    fn start_frame(&self) -> Frame {
        self.state().start_frame
    }

    fn stats(&self) -> EntityStats {
        self.state().stats
    }

    fn persistent_state(&self) -> Vec<u8> {
        self.state().persistent_state.clone()
    }
}
