//! Directory-backed artifact store
//!
//! Each artifact lives in `<root>/<run id>/<sha256(name)>/` with a
//! `manifest.json` and its files copied under `files/` at their
//! workspace-relative paths.

use crate::artifact::{ArtifactError, ArtifactStore, PublishedArtifact};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<data dir>/gantry/artifacts`
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gantry")
            .join("artifacts")
    }

    fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    fn artifact_dir(&self, run_id: Uuid, name: &str) -> PathBuf {
        self.run_dir(run_id)
            .join(hex::encode(Sha256::digest(name.as_bytes())))
    }

    /// Where the stored copy of `file` of artifact `name` lives
    pub fn file_path(&self, run_id: Uuid, name: &str, file: &Path) -> PathBuf {
        self.artifact_dir(run_id, name).join(FILES_DIR).join(file)
    }

    async fn stage(&self, staging: &Path, root: &Path, published: &PublishedArtifact) -> Result<(), ArtifactError> {
        for file in &published.files {
            let dest = staging.join(FILES_DIR).join(file);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(root.join(file), &dest).await?;
        }
        tokio::fs::write(
            staging.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(published)?,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn publish(
        &self,
        run_id: Uuid,
        name: &str,
        root: &Path,
        files: &[PathBuf],
        retention_days: Option<u32>,
    ) -> Result<PublishedArtifact, ArtifactError> {
        if files.is_empty() {
            return Err(ArtifactError::NoFilesFound(name.to_string()));
        }
        let target = self.artifact_dir(run_id, name);
        if tokio::fs::metadata(&target).await.is_ok() {
            return Err(ArtifactError::AlreadyPublished(name.to_string()));
        }

        let run_dir = self.run_dir(run_id);
        tokio::fs::create_dir_all(&run_dir).await?;
        let staging = run_dir.join(format!(".staging-{}", Uuid::new_v4()));
        let published = PublishedArtifact {
            run_id,
            name: name.to_string(),
            files: files.to_vec(),
            retention_days,
            published_at: Utc::now(),
        };
        if let Err(e) = self.stage(&staging, root, &published).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        // a concurrent publisher of the same name loses the rename
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            if tokio::fs::metadata(&target).await.is_ok() {
                return Err(ArtifactError::AlreadyPublished(name.to_string()));
            }
            return Err(e.into());
        }
        debug!("Stored artifact '{}' of run {} in {}", name, run_id, target.display());
        Ok(published)
    }

    async fn get(&self, run_id: Uuid, name: &str) -> Result<Option<PublishedArtifact>, ArtifactError> {
        let manifest = self.artifact_dir(run_id, name).join(MANIFEST_FILE);
        match tokio::fs::read(&manifest).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
