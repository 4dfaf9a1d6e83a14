//! Artifact collection and publication
//!
//! Artifacts are resolved against the workspace after a job instance
//! finished its steps. A declared glob that matches nothing demotes a
//! succeeded instance to failed under the `error` policy. Names are
//! write-once within a run; every run publishes into its own namespace.

pub mod local;
pub mod memory;

pub use local::LocalArtifactStore;
pub use memory::InMemoryArtifactStore;

use crate::core::context::InstanceContext;
use crate::core::error::JobFailure;
use crate::workspace;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact '{0}' has no files to publish")]
    NoFilesFound(String),

    #[error("artifact '{0}' was already published")]
    AlreadyPublished(String),

    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// What to do when a declared path matches no files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoFilesPolicy {
    /// Fail the job
    #[default]
    Error,
    /// Log a warning and publish what was found
    Warn,
    /// Publish what was found silently
    Ignore,
}

/// Which job outcomes publish the artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishPolicy {
    #[default]
    Success,
    /// Also publish for failed jobs, for diagnostics
    Always,
}

/// Declared artifact of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Name template, e.g. `app-{instance.id}`
    pub name: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub if_no_files_found: NoFilesPolicy,
    #[serde(default)]
    pub retention_days: Option<u32>,
    #[serde(default)]
    pub when: PublishPolicy,
}

impl ArtifactSpec {
    pub fn new<I, S>(name: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            paths: paths.into_iter().map(Into::into).collect(),
            if_no_files_found: NoFilesPolicy::Error,
            retention_days: None,
            when: PublishPolicy::Success,
        }
    }

    pub fn with_no_files_policy(mut self, policy: NoFilesPolicy) -> Self {
        self.if_no_files_found = policy;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    pub fn with_publish_policy(mut self, when: PublishPolicy) -> Self {
        self.when = when;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("artifact name must not be empty".to_string());
        }
        if self.paths.is_empty() {
            return Err(format!("artifact '{}' declares no paths", self.name));
        }
        Ok(())
    }
}

/// A published, immutable artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    /// Run that published it
    pub run_id: Uuid,
    pub name: String,
    /// Paths relative to the workspace
    pub files: Vec<PathBuf>,
    pub retention_days: Option<u32>,
    pub published_at: DateTime<Utc>,
}

/// Blob store boundary for artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `files` (relative to `root`) under `name` for `run_id`.
    /// Names are write-once per run.
    async fn publish(
        &self,
        run_id: Uuid,
        name: &str,
        root: &Path,
        files: &[PathBuf],
        retention_days: Option<u32>,
    ) -> Result<PublishedArtifact, ArtifactError>;

    async fn get(&self, run_id: Uuid, name: &str) -> Result<Option<PublishedArtifact>, ArtifactError>;
}

/// Resolves artifact specs of one run's instances and hands them to the store
#[derive(Clone)]
pub struct ArtifactPublisher {
    workspace: PathBuf,
    store: Arc<dyn ArtifactStore>,
    run_id: Uuid,
}

impl ArtifactPublisher {
    pub fn new(workspace: impl Into<PathBuf>, store: Arc<dyn ArtifactStore>, run_id: Uuid) -> Self {
        Self {
            workspace: workspace.into(),
            store,
            run_id,
        }
    }

    /// Whether `spec` should publish given the job body outcome
    pub fn applies(spec: &ArtifactSpec, job_succeeded: bool) -> bool {
        job_succeeded || spec.when == PublishPolicy::Always
    }

    /// Publish one artifact for an instance.
    ///
    /// Returns `Ok(None)` when nothing was found and the policy tolerates it.
    pub async fn publish(
        &self,
        spec: &ArtifactSpec,
        context: &InstanceContext,
    ) -> Result<Option<PublishedArtifact>, JobFailure> {
        let name = context.render(&spec.name, &HashMap::new());

        let mut files = Vec::new();
        for pattern in &spec.paths {
            let matched = workspace::resolve_glob(&self.workspace, pattern);
            if matched.is_empty() {
                match spec.if_no_files_found {
                    NoFilesPolicy::Error => {
                        return Err(JobFailure::ArtifactMissing {
                            artifact: name,
                            pattern: pattern.clone(),
                        })
                    }
                    NoFilesPolicy::Warn => {
                        warn!("Artifact '{}': path '{}' matched no files", name, pattern)
                    }
                    NoFilesPolicy::Ignore => {}
                }
            }
            files.extend(matched);
        }
        files.sort();
        files.dedup();

        if files.is_empty() {
            return Ok(None);
        }

        let relative: Vec<PathBuf> = files
            .iter()
            .map(|f| f.strip_prefix(&self.workspace).unwrap_or(f).to_path_buf())
            .collect();

        let published = self
            .store
            .publish(self.run_id, &name, &self.workspace, &relative, spec.retention_days)
            .await
            .map_err(|e| JobFailure::ArtifactPublish {
                artifact: name.clone(),
                reason: e.to_string(),
            })?;
        info!("Published artifact '{}' ({} files)", name, published.files.len());
        Ok(Some(published))
    }
}
