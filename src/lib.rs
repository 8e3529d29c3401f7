//! # arena-core - lifecycle pipeline and frame scheduler for simulation servers
//!
//! A real-time multiplayer simulation runs many independent entities whose
//! program logic is supplied from outside and may be slow or faulty. This
//! crate keeps the fixed-rate tick safe from that logic.
//!
//! ## Core Concepts
//!
//! - **Lifecycle pipeline**: entity startup runs on a pool of parallel
//!   workers, teardown on a single serialized worker; results come back
//!   through queues drained once per tick
//! - **Limbo**: entities whose startup or teardown is still in flight
//! - **Frame pacing**: absolute deadlines on a fixed grid, so overruns
//!   never accumulate drift
//! - **Reconciliation**: the roster is periodically aligned with the
//!   external source of truth, and pending commands are resolved
//! - **Orchestrator**: owns simulation, storage and transport, and bridges
//!   kill and crash events to storage
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use arena_core::arena::{Arena, ArenaConfig, BuiltinLoader};
//! use arena_core::schedule::MonotonicClock;
//! use arena_core::storage::InMemoryStorage;
//! use arena_core::transport::TcpTransport;
//! use arena_core::{Orchestrator, ServerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?;
//! let arena = Arena::new(ArenaConfig::default(), &config.pipeline(), BuiltinLoader)?;
//! let storage = Arc::new(InMemoryStorage::new());
//! let mut server = Orchestrator::new(config, arena, storage, TcpTransport::new(), MonotonicClock);
//! server.run()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod command;
pub mod config;
pub mod entity;
pub mod error;

// Lifecycle execution
pub mod lifecycle;
pub mod limbo;

// Collaborators
pub mod arena;
pub mod simulation;
pub mod storage;
pub mod transport;
pub mod update;

// Scheduling and the main loop
pub mod orchestrator;
pub mod reconcile;
pub mod schedule;
pub mod telemetry;

// Re-export primary types at crate root for convenience
pub use command::{CommandId, CommandKind, ExternalCommand};
pub use config::ServerConfig;
pub use entity::{BuildRecord, BuildStatus, EntityId, EntityStats, FoodConsumed, Frame, Lifecycle, SimEntity, VersionId};
pub use error::{
    ArenaError, ArenaResult, InitError, LifecycleError, ScheduleError, SpawnError, StorageError, TaskError,
    TransportError, ValidationError,
};
pub use lifecycle::{LifecyclePipeline, LifecycleResult, PipelineConfig, QueueStats, TaskKind, WorkerPool};
pub use limbo::{Limbo, LimboEvent};
pub use orchestrator::{LoopControl, Orchestrator, ShutdownHandle};
pub use reconcile::{create_entity, CreateOutcome, ReconcileReport, ReconciliationJob};
pub use schedule::{Clock, FramePacer, ManualClock, MonotonicClock, PeriodicJob};
pub use simulation::{MassTotals, Roster, SimEvent, Simulation};
pub use storage::{InMemoryStorage, KillReport, LiveStats, Storage};
pub use telemetry::TelemetrySampler;
pub use transport::{ConnectionHandler, Flow, MemoryTransport, Peer, TcpTransport, Transport};
