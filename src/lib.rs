//! gantry - a declarative build-orchestration engine
//!
//! Pipelines are expanded into matrix job instances, scheduled under
//! concurrency and fail-fast policies, and run step by step with
//! content-addressed caches and artifact publication.

pub mod artifact;
pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod runner;
pub mod workspace;

// Re-export commonly used types
pub use artifact::{ArtifactPublisher, ArtifactSpec, ArtifactStore, InMemoryArtifactStore, LocalArtifactStore};
pub use cache::{CacheSpec, CacheStore, InMemoryCacheStore, LocalCacheStore, MatchKind};
pub use core::{ExecutionStatus, Job, JobInstance, JobStatus, PipelineDefinition, Step};
pub use execution::{EngineConfig, ExecutionEngine, ExecutionEvent, RunReport, SchedulingStrategy};
pub use runner::{CommandRunner, ShellRunner};
