//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod scheduler;

pub use engine::{EngineConfig, EventBus, EventHandler, ExecutionEngine, ExecutionEvent, RunReport};
pub use executor::JobExecutor;
pub use scheduler::{ExecutionScheduler, InstanceGroup, SchedulingStrategy};
