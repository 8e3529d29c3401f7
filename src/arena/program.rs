//! Externally supplied entity logic.
//!
//! A `Program` is whatever drives an entity: a sandboxed script, a child
//! process, a plugin. The arena only needs the four calls below.

use crate::entity::{BuildRecord, Frame};
use crate::error::TaskError;

/// What a program sees on each step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepView {
    /// Frame being simulated.
    pub frame: Frame,
    /// Mass before this step's feeding.
    pub mass: f64,
}

/// What a program asks for on each step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Food the entity tries to consume next tick.
    pub appetite: f64,
    /// Output deferred to the observer feed.
    pub log: Vec<String>,
}

/// Behavior of one entity.
pub trait Program: Send {
    /// Prepares the program. Runs on a startup worker.
    ///
    /// # Errors
    ///
    /// Returns a `TaskError` if the program cannot start.
    fn start(&mut self) -> Result<(), TaskError>;

    /// Advances one step. Runs on the simulation thread.
    ///
    /// # Errors
    ///
    /// An `Err` crashes the entity; the text is reported to storage.
    fn step(&mut self, view: &StepView) -> Result<StepOutcome, String>;

    /// Releases the program. Runs on the shutdown worker.
    ///
    /// # Errors
    ///
    /// Returns a `TaskError` if teardown failed.
    fn stop(&mut self) -> Result<(), TaskError>;

    /// Durable state to keep across lives.
    fn persistent_state(&self) -> Vec<u8>;
}

/// Builds programs from build records.
pub trait ProgramLoader {
    /// Creates the program for `record`.
    ///
    /// # Errors
    ///
    /// The returned text becomes the entity's initialization error.
    fn load(&self, record: &BuildRecord) -> Result<Box<dyn Program>, String>;
}

/// Built-in program that eats at a constant rate and remembers how many
/// lives it has had.
#[derive(Debug, Clone)]
pub struct Grazer {
    appetite: f64,
    lives: u32,
    steps: u64,
}

impl Grazer {
    /// Creates a grazer from its persisted state (a little-endian life count).
    #[must_use]
    pub fn new(appetite: f64, persisted: &[u8]) -> Self {
        let lives = persisted
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .map_or(0, u32::from_le_bytes);
        Self {
            appetite,
            lives,
            steps: 0,
        }
    }
}

impl Program for Grazer {
    fn start(&mut self) -> Result<(), TaskError> {
        self.lives = self.lives.saturating_add(1);
        Ok(())
    }

    fn step(&mut self, view: &StepView) -> Result<StepOutcome, String> {
        self.steps += 1;
        let mut log = Vec::new();
        if self.steps == 1 {
            log.push(format!("life {} begins at frame {}", self.lives, view.frame));
        }
        Ok(StepOutcome {
            appetite: self.appetite,
            log,
        })
    }

    fn stop(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    fn persistent_state(&self) -> Vec<u8> {
        self.lives.to_le_bytes().to_vec()
    }
}

/// Loader for the programs shipped with the server.
///
/// Recognized program names: `grazer` (also the empty name) and `idle`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLoader;

impl ProgramLoader for BuiltinLoader {
    fn load(&self, record: &BuildRecord) -> Result<Box<dyn Program>, String> {
        match record.program.trim() {
            "" | "grazer" => Ok(Box::new(Grazer::new(0.05, &record.persistent_state))),
            "idle" => Ok(Box::new(Grazer::new(0.0, &record.persistent_state))),
            other => Err(format!("unknown program '{other}'")),
        }
    }
}
