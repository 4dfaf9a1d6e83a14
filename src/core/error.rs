//! Error taxonomy for pipeline definitions and job execution

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or expanding a pipeline definition.
///
/// These are fatal at definition time: nothing runs when expansion fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("malformed matrix in job '{job}': {reason}")]
    MalformedMatrix { job: String, reason: String },

    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(String),
}

impl PipelineError {
    pub fn malformed_matrix(job: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedMatrix {
            job: job.into(),
            reason: reason.into(),
        }
    }
}

/// Why a single step did not succeed
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepFailure {
    #[error("exited with code {0}")]
    ExitCode(i32),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("required tool '{0}' is not available on this host")]
    ToolMissing(String),

    #[error("failed to start: {0}")]
    Spawn(String),
}

/// Why a job instance ended `failed`
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobFailure {
    #[error("step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: StepFailure },

    #[error("step '{step}' requires missing tool '{tool}'")]
    ToolMissing { step: String, tool: String },

    #[error("job exceeded its {0} second time budget")]
    Timeout(u64),

    #[error("artifact '{artifact}' declared path '{pattern}' matched no files")]
    ArtifactMissing { artifact: String, pattern: String },

    #[error("artifact '{artifact}' could not be published: {reason}")]
    ArtifactPublish { artifact: String, reason: String },
}
