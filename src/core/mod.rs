//! Core domain models
//!
//! Pipelines, jobs, steps, matrices and conditions, plus the YAML
//! configuration they are loaded from.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod matrix;
pub mod pipeline;
pub mod state;
pub mod step;

pub use condition::{Condition, ConditionError, VariableSource};
pub use context::InstanceContext;
pub use error::{JobFailure, PipelineError, StepFailure};
pub use matrix::{MatrixSpec, MatrixValues};
pub use pipeline::{Job, PipelineDefinition};
pub use state::*;
pub use step::*;
