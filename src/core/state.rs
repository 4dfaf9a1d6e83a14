//! Execution state models

use crate::artifact::PublishedArtifact;
use crate::cache::CacheOutcome;
use crate::core::{context::InstanceContext, error::JobFailure, error::StepFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every job instance succeeded or was skipped
    Succeeded,
    /// At least one job instance failed or was cancelled
    Failed,
}

/// Status of a single job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
        )
    }

    /// Whether this status counts towards an overall success
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Skipped)
    }
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Succeeded { exit_code: i32 },
    /// `continued` is set when `continue_on_error` kept the job going
    Failed { failure: StepFailure, continued: bool },
    Skipped { reason: String },
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

/// Log entry for a step of a job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    pub outcome: StepOutcome,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Set for cache steps
    #[serde(default)]
    pub cache: Option<CacheOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn skipped(index: usize, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            outcome: StepOutcome::Skipped {
                reason: reason.into(),
            },
            stdout: String::new(),
            stderr: String::new(),
            cache: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// One concrete, fully parameterised execution of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub pipeline: String,
    pub job_id: String,
    /// Position within the job's expanded matrix
    pub index: usize,
    /// Slug identity, unique within a run: `job-v1-v2`
    pub id: String,
    /// Display name: `job (v1, v2)`
    pub name: String,
    pub context: InstanceContext,
    pub status: JobStatus,
    pub failure: Option<JobFailure>,
    pub steps: Vec<StepRecord>,
    pub artifacts: Vec<PublishedArtifact>,
    /// Cache keys written after the job body ran
    pub saved_cache_keys: Vec<String>,
    pub skip_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobInstance {
    pub fn new(context: InstanceContext) -> Self {
        Self {
            pipeline: context.pipeline.clone(),
            job_id: context.job_id.clone(),
            index: context.instance_index,
            id: context.instance_id.clone(),
            name: context.instance_name.clone(),
            context,
            status: JobStatus::Pending,
            failure: None,
            steps: Vec::new(),
            artifacts: Vec::new(),
            saved_cache_keys: Vec::new(),
            skip_reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self) {
        self.status = JobStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, failure: JobFailure) {
        self.status = JobStatus::Failed;
        self.failure = Some(failure);
        self.finished_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Skipped;
        self.skip_reason = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }

    /// Record of a step by name
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Names of steps that actually ran, in order
    pub fn executed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| !matches!(s.outcome, StepOutcome::Skipped { .. }))
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Aggregate state of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Current status
    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: Option<DateTime<Utc>>,

    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,

    pub total_instances: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_instances: 0,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            skipped: 0,
        }
    }

    /// Mark the run as started
    pub fn start(&mut self, total_instances: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_instances = total_instances;
    }

    /// Tally final instance statuses and settle the overall status
    pub fn finish(&mut self, instances: &[JobInstance]) {
        self.update_counts(instances);
        let all_ok = instances.iter().all(|i| i.status.is_success());
        self.status = if all_ok {
            ExecutionStatus::Succeeded
        } else {
            ExecutionStatus::Failed
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn update_counts(&mut self, instances: &[JobInstance]) {
        let count = |status: JobStatus| instances.iter().filter(|i| i.status == status).count();
        self.total_instances = instances.len();
        self.succeeded = count(JobStatus::Succeeded);
        self.failed = count(JobStatus::Failed);
        self.cancelled = count(JobStatus::Cancelled);
        self.skipped = count(JobStatus::Skipped);
    }

    /// Fraction of instances in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_instances == 0 {
            return 0.0;
        }
        (self.succeeded + self.failed + self.cancelled + self.skipped) as f64
            / self.total_instances as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
