//! Storage layer.
//!
//! - `traits`: the `Storage` contract and the records written through it
//! - `memory`: thread-safe in-memory backend

pub mod memory;
pub mod traits;

pub use memory::{InMemoryStorage, StorageSeed};
pub use traits::{CrashReport, KillReport, LiveStats, Storage, NO_KILLER};
