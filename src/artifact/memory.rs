use crate::artifact::{ArtifactError, ArtifactStore, PublishedArtifact};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

type Stored = (PublishedArtifact, Vec<Vec<u8>>);

/// Artifact store keeping file contents in memory
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<HashMap<(Uuid, String), Stored>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published names across every run, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .artifacts
            .read()
            .await
            .keys()
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names published by one run, sorted
    pub async fn names_in(&self, run_id: Uuid) -> Vec<String> {
        let mut names: Vec<String> = self
            .artifacts
            .read()
            .await
            .keys()
            .filter(|(run, _)| *run == run_id)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stored bytes of one file of the latest artifact called `name`
    pub async fn contents(&self, name: &str, file: &Path) -> Option<Vec<u8>> {
        let artifacts = self.artifacts.read().await;
        let (meta, blobs) = artifacts
            .iter()
            .filter(|((_, stored), _)| stored == name)
            .map(|(_, entry)| entry)
            .max_by_key(|(meta, _)| meta.published_at)?;
        let position = meta.files.iter().position(|f| f == file)?;
        blobs.get(position).cloned()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
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

        let mut blobs = Vec::with_capacity(files.len());
        for file in files {
            blobs.push(tokio::fs::read(root.join(file)).await?);
        }

        let key = (run_id, name.to_string());
        let mut artifacts = self.artifacts.write().await;
        if artifacts.contains_key(&key) {
            return Err(ArtifactError::AlreadyPublished(name.to_string()));
        }
        let published = PublishedArtifact {
            run_id,
            name: name.to_string(),
            files: files.to_vec(),
            retention_days,
            published_at: Utc::now(),
        };
        artifacts.insert(key, (published.clone(), blobs));
        Ok(published)
    }

    async fn get(&self, run_id: Uuid, name: &str) -> Result<Option<PublishedArtifact>, ArtifactError> {
        let key = (run_id, name.to_string());
        Ok(self.artifacts.read().await.get(&key).map(|(meta, _)| meta.clone()))
    }
}
