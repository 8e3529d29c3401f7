//! Background lifecycle execution.
//!
//! Entity startup and teardown never run on the simulation thread. The
//! simulation enqueues `LifecycleTask`s and drains `LifecycleResult`s once
//! per tick without ever waiting on a worker.

pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod task;

pub use pipeline::{LifecyclePipeline, PipelineConfig, QueueStats};
pub use pool::WorkerPool;
pub use queue::{InProgressSet, TaskQueue};
pub use task::{LifecycleResult, LifecycleTask, TaskKind};
