//! Pipeline domain model

use crate::artifact::ArtifactSpec;
use crate::core::{
    condition::Condition,
    context::InstanceContext,
    error::PipelineError,
    matrix::{MatrixSpec, MatrixValues},
    state::JobInstance,
    step::{Step, StepAction},
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A job template; expanded into one instance per matrix point
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier within the pipeline
    pub id: String,

    /// Display name (defaults to the id)
    pub name: String,

    /// Job-level condition; false moves every instance to `skipped`
    pub condition: Option<Condition>,

    pub env: HashMap<String, String>,

    pub matrix: Option<MatrixSpec>,

    /// Cancel sibling instances when one fails
    pub fail_fast: bool,

    /// Concurrency bound for this job's instances
    pub max_parallel: Option<usize>,

    pub timeout: Option<Duration>,

    pub steps: Vec<Step>,

    pub artifacts: Vec<ArtifactSpec>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            condition: None,
            env: HashMap::new(),
            matrix: None,
            fail_fast: true,
            max_parallel: None,
            timeout: None,
            steps: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(Condition::parse(condition));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_matrix(mut self, matrix: MatrixSpec) -> Self {
        self.matrix = Some(matrix);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = Some(max);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactSpec) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Expand the matrix (if any) into the ordered list of points
    pub fn matrix_points(&self) -> Result<Vec<MatrixValues>, PipelineError> {
        match &self.matrix {
            Some(matrix) => matrix
                .expand()
                .map_err(|e| PipelineError::malformed_matrix(&self.id, e.to_string())),
            None => Ok(vec![MatrixValues::new()]),
        }
    }

    /// Every condition declared on the job or its steps
    pub fn conditions(&self) -> impl Iterator<Item = (String, &Condition)> {
        let job = self
            .condition
            .iter()
            .map(move |c| (format!("job '{}'", self.id), c));
        let steps = self.steps.iter().filter_map(move |s| {
            s.condition
                .as_ref()
                .map(|c| (format!("job '{}' step '{}'", self.id, s.name), c))
        });
        job.chain(steps)
    }
}

/// An immutable, already parsed pipeline
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// Pipeline name; distinct pipelines are scheduled independently
    pub name: String,

    /// Variables available as `vars.*`
    pub variables: HashMap<String, String>,

    /// Environment shared by every job
    pub env: HashMap<String, String>,

    /// Jobs in declaration order
    pub jobs: Vec<Job>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: HashMap::new(),
            env: HashMap::new(),
            jobs: Vec::new(),
        }
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Get a job by ID
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Structural checks that do not depend on runtime context
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(PipelineError::InvalidDefinition(format!(
                    "duplicate job id '{}'",
                    job.id
                )));
            }
            if job.steps.is_empty() {
                return Err(PipelineError::InvalidDefinition(format!(
                    "job '{}' has no steps",
                    job.id
                )));
            }
            if job.max_parallel == Some(0) {
                return Err(PipelineError::InvalidDefinition(format!(
                    "job '{}' has max_parallel of 0",
                    job.id
                )));
            }
            for step in &job.steps {
                if let StepAction::Cache(spec) = &step.action {
                    spec.validate().map_err(|e| {
                        PipelineError::InvalidDefinition(format!(
                            "job '{}' step '{}': {}",
                            job.id, step.name, e
                        ))
                    })?;
                }
            }
            if let Some(matrix) = &job.matrix {
                matrix
                    .validate()
                    .map_err(|e| PipelineError::malformed_matrix(&job.id, e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Conditions that failed to parse. They evaluate to false at run time.
    pub fn condition_warnings(&self) -> Vec<String> {
        self.jobs
            .iter()
            .flat_map(|job| job.conditions())
            .filter_map(|(location, condition)| {
                condition
                    .error()
                    .map(|e| format!("{}: condition '{}' is invalid: {}", location, condition.source(), e))
            })
            .collect()
    }

    /// Expand every job into its concrete instances, in declaration order.
    ///
    /// Fails before anything runs when any matrix is malformed.
    pub fn expand(
        &self,
        invocation: &HashMap<String, String>,
    ) -> Result<Vec<JobInstance>, PipelineError> {
        self.expand_into(invocation, &mut HashSet::new())
    }

    /// Expand with instance ids kept unique against `taken`, the ids other
    /// pipelines of the same run already hold. A clashing id is prefixed
    /// with this pipeline's slug.
    pub fn expand_into(
        &self,
        invocation: &HashMap<String, String>,
        taken: &mut HashSet<String>,
    ) -> Result<Vec<JobInstance>, PipelineError> {
        let mut instances = Vec::new();
        let mut own_ids = HashSet::new();

        for job in &self.jobs {
            let points = job.matrix_points()?;
            let has_matrix = job.matrix.is_some();

            for (index, point) in points.into_iter().enumerate() {
                let (mut id, name) = if has_matrix {
                    let values: Vec<&str> = point.iter().map(|(_, v)| v).collect();
                    (
                        slug(&format!("{}-{}", job.id, values.join("-"))),
                        format!("{} ({})", job.name, values.join(", ")),
                    )
                } else {
                    (slug(&job.id), job.name.clone())
                };
                if own_ids.contains(&id) {
                    id = format!("{}-{}", id, index);
                }
                if taken.contains(&id) {
                    id = slug(&format!("{}-{}", self.name, id));
                }
                let stem = id.clone();
                let mut n = 2;
                while taken.contains(&id) {
                    id = format!("{}-{}", stem, n);
                    n += 1;
                }
                own_ids.insert(id.clone());
                taken.insert(id.clone());

                let mut env = self.env.clone();
                env.extend(job.env.clone());

                let context = InstanceContext {
                    run_id: String::new(),
                    pipeline: self.name.clone(),
                    job_id: job.id.clone(),
                    job_name: job.name.clone(),
                    instance_id: id,
                    instance_name: name,
                    instance_index: index,
                    matrix: point,
                    invocation: invocation.clone(),
                    variables: self.variables.clone(),
                    env,
                };
                instances.push(JobInstance::new(context));
            }
        }

        Ok(instances)
    }
}

/// Lowercase, with runs of non-alphanumerics collapsed into '-'
fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
