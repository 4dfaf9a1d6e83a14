//! Pipeline configuration from YAML

use crate::artifact::{ArtifactSpec, NoFilesPolicy, PublishPolicy};
use crate::cache::{CacheSpec, SavePolicy};
use crate::core::{
    error::PipelineError,
    matrix::{MatrixSpec, MatrixValues},
    pipeline::{Job, PipelineDefinition},
    step::Step,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Variables available to conditions and templates as `vars.*`
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Environment shared by every job
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Default step timeout (in minutes)
    #[serde(default, alias = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,

    /// Jobs keyed by id, in declaration order
    pub jobs: Mapping,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    /// Human-readable job name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default, alias = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,

    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    pub steps: Vec<StepConfig>,

    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,
}

/// Matrix strategy of a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_fail_fast", alias = "fail-fast")]
    pub fail_fast: bool,

    #[serde(default, alias = "max-parallel")]
    pub max_parallel: Option<usize>,

    /// Axis name to value list, plus optional `include` / `exclude`
    #[serde(default)]
    pub matrix: Option<Mapping>,
}

fn default_fail_fast() -> bool {
    true
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,

    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    /// Command body; exclusive with `cache`
    #[serde(default)]
    pub run: Option<String>,

    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub cache: Option<CacheConfig>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default, alias = "continue-on-error")]
    pub continue_on_error: bool,

    #[serde(default, alias = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,

    #[serde(default, alias = "working-directory")]
    pub working_directory: Option<PathBuf>,

    /// Tools that must be installed on the host
    #[serde(default)]
    pub requires: Vec<String>,
}

/// Cache configuration of a cache step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub key: String,

    #[serde(default, alias = "restore-keys")]
    pub restore_keys: Vec<String>,

    pub paths: Vec<String>,

    #[serde(default, alias = "hash-files")]
    pub hash_files: Vec<String>,

    #[serde(default)]
    pub save: SavePolicy,
}

/// Artifact configuration of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub name: String,

    pub paths: Vec<String>,

    #[serde(default, alias = "if-no-files-found")]
    pub if_no_files_found: NoFilesPolicy,

    #[serde(default, alias = "retention-days")]
    pub retention_days: Option<u32>,

    #[serde(default)]
    pub when: PublishPolicy,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid pipeline file {}", path.display()))
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Jobs in declaration order
    pub fn jobs(&self) -> Result<Vec<(String, JobConfig)>> {
        let mut jobs = Vec::with_capacity(self.jobs.len());
        for (key, value) in &self.jobs {
            let id = scalar_to_string(key)
                .with_context(|| format!("Job ids must be strings, got {:?}", key))?;
            let job: JobConfig = serde_yaml::from_value(value.clone())
                .with_context(|| format!("Invalid job '{}'", id))?;
            jobs.push((id, job));
        }
        Ok(jobs)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        let jobs = self.jobs()?;
        if jobs.is_empty() {
            anyhow::bail!("Pipeline '{}' declares no jobs", self.name);
        }

        checked_minutes(self.timeout_minutes, "pipeline")?;

        let mut seen_ids = HashSet::new();
        for (id, job) in &jobs {
            if !seen_ids.insert(id.clone()) {
                anyhow::bail!("Duplicate job ID: {}", id);
            }
            if job.steps.is_empty() {
                anyhow::bail!("Job '{}' has no steps", id);
            }
            checked_minutes(job.timeout_minutes, &format!("job '{}'", id))?;
            for step in &job.steps {
                checked_minutes(
                    step.timeout_minutes,
                    &format!("step '{}' of job '{}'", step.name, id),
                )?;
                match (&step.run, &step.cache) {
                    (Some(_), None) | (None, Some(_)) => {}
                    _ => anyhow::bail!(
                        "Step '{}' of job '{}' must declare exactly one of 'run' or 'cache'",
                        step.name,
                        id
                    ),
                }
                if let Some(cache) = &step.cache {
                    if cache.key.trim().is_empty() || cache.paths.is_empty() {
                        anyhow::bail!(
                            "Cache step '{}' of job '{}' needs a key and at least one path",
                            step.name,
                            id
                        );
                    }
                }
            }
            for artifact in &job.artifacts {
                if artifact.name.trim().is_empty() || artifact.paths.is_empty() {
                    anyhow::bail!("Artifacts of job '{}' need a name and at least one path", id);
                }
            }
            if let Some(strategy) = &job.strategy {
                if strategy.max_parallel == Some(0) {
                    anyhow::bail!("Job '{}' has max_parallel of 0", id);
                }
                if let Some(matrix) = &strategy.matrix {
                    parse_matrix(id, matrix)?.validate().map_err(|e| PipelineError::malformed_matrix(id, e.to_string()))?;
                }
            }
        }

        Ok(())
    }

    /// Get variables as string map
    pub fn variables_as_string_map(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(k, v)| {
                let value = scalar_to_string(v)
                    .unwrap_or_else(|| serde_yaml::to_string(v).unwrap_or_default().trim().to_string());
                (k.clone(), value)
            })
            .collect()
    }

    /// Convert config to the immutable pipeline definition
    pub fn to_definition(&self) -> Result<PipelineDefinition> {
        let default_timeout = checked_minutes(self.timeout_minutes, "pipeline")?;
        let mut definition = PipelineDefinition::new(self.name.clone());
        definition.env = self.env.clone();
        definition.variables = self.variables_as_string_map();

        for (id, config) in self.jobs()? {
            let mut job = Job::new(id.clone());
            if let Some(name) = &config.name {
                job = job.with_name(name.clone());
            }
            if let Some(condition) = &config.condition {
                job = job.with_condition(condition);
            }
            job.env = config.env.clone();
            job.timeout = checked_minutes(config.timeout_minutes, &format!("job '{}'", id))?;

            if let Some(strategy) = &config.strategy {
                job.fail_fast = strategy.fail_fast;
                job.max_parallel = strategy.max_parallel;
                if let Some(matrix) = &strategy.matrix {
                    job.matrix = Some(parse_matrix(&id, matrix)?);
                }
            }

            for step in &config.steps {
                job = job.with_step(step.to_step(&id, default_timeout)?);
            }
            for artifact in &config.artifacts {
                job = job.with_artifact(artifact.to_spec());
            }
            definition = definition.with_job(job);
        }

        definition.validate()?;
        Ok(definition)
    }
}

impl StepConfig {
    fn to_step(&self, job: &str, default_timeout: Option<Duration>) -> Result<Step> {
        let mut step = match (&self.run, &self.cache) {
            (_, Some(cache)) => Step::cache(self.name.clone(), cache.to_spec()),
            (Some(command), None) => Step::run(self.name.clone(), command.clone()),
            (None, None) => Step::run(self.name.clone(), String::new()),
        };
        if let Some(condition) = &self.condition {
            step = step.with_condition(condition);
        }
        if let Some(shell) = &self.shell {
            step = step.with_shell(shell.clone());
        }
        step.env = self.env.clone();
        step.continue_on_error = self.continue_on_error;
        let own_timeout = checked_minutes(
            self.timeout_minutes,
            &format!("step '{}' of job '{}'", self.name, job),
        )?;
        step.timeout = own_timeout.or(default_timeout);
        step.working_directory = self.working_directory.clone();
        step.requires = self.requires.clone();
        Ok(step)
    }
}

impl CacheConfig {
    fn to_spec(&self) -> CacheSpec {
        CacheSpec {
            key: self.key.clone(),
            restore_keys: self.restore_keys.clone(),
            paths: self.paths.clone(),
            hash_files: self.hash_files.clone(),
            save: self.save,
        }
    }
}

impl ArtifactConfig {
    fn to_spec(&self) -> ArtifactSpec {
        ArtifactSpec {
            name: self.name.clone(),
            paths: self.paths.clone(),
            if_no_files_found: self.if_no_files_found,
            retention_days: self.retention_days,
            when: self.when,
        }
    }
}

/// `None` when the value does not fit in seconds
fn minutes(value: u64) -> Option<Duration> {
    value.checked_mul(60).map(Duration::from_secs)
}

fn checked_minutes(value: Option<u64>, owner: &str) -> Result<Option<Duration>> {
    match value {
        None => Ok(None),
        Some(value) => match minutes(value) {
            Some(duration) => Ok(Some(duration)),
            None => anyhow::bail!("{} timeout_minutes {} is out of range", owner, value),
        },
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_overlay(job: &str, value: &Value) -> Result<MatrixValues, PipelineError> {
    let Value::Mapping(map) = value else {
        return Err(PipelineError::malformed_matrix(job, "include/exclude entries must be mappings"));
    };
    let mut overlay = MatrixValues::new();
    for (key, value) in map {
        match (scalar_to_string(key), scalar_to_string(value)) {
            (Some(key), Some(value)) => overlay.insert(key, value),
            _ => {
                return Err(PipelineError::malformed_matrix(
                    job,
                    format!("overlay entry {:?} must map a name to a scalar", key),
                ))
            }
        }
    }
    Ok(overlay)
}

/// Build a matrix spec from its YAML mapping, preserving axis order
fn parse_matrix(job: &str, matrix: &Mapping) -> Result<MatrixSpec, PipelineError> {
    let mut spec = MatrixSpec::new();
    for (key, value) in matrix {
        let Some(name) = scalar_to_string(key) else {
            return Err(PipelineError::malformed_matrix(job, "axis names must be strings"));
        };
        let Value::Sequence(items) = value else {
            return Err(PipelineError::malformed_matrix(
                job,
                format!("'{}' must be a list", name),
            ));
        };

        match name.as_str() {
            "include" => {
                for item in items {
                    spec = spec.with_include(parse_overlay(job, item)?);
                }
            }
            "exclude" => {
                for item in items {
                    spec = spec.with_exclude(parse_overlay(job, item)?);
                }
            }
            _ => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let Some(value) = scalar_to_string(item) else {
                        return Err(PipelineError::malformed_matrix(
                            job,
                            format!("values of axis '{}' must be scalars", name),
                        ));
                    };
                    values.push(value);
                }
                spec = spec.with_axis(name, values);
            }
        }
    }
    Ok(spec)
}
