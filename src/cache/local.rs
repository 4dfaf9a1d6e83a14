//! Directory-backed cache store
//!
//! Layout: `<root>/<sha256(key)>/entry.json` plus `<root>/<sha256(key)>/blobs/<n>`.
//! An entry is staged in a scratch directory and renamed into place, so a
//! concurrent reader never sees a half-written entry.

use crate::cache::{restore_target, select_entry, stored_path, CacheError, CacheStore, RestoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const METADATA_FILE: &str = "entry.json";
const BLOB_DIR: &str = "blobs";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMetadata {
    key: String,
    stored_at: DateTime<Utc>,
    /// Workspace-relative unless the file lived outside the workspace
    files: Vec<PathBuf>,
}

impl EntryMetadata {
    fn sequence(&self) -> u64 {
        self.stored_at.timestamp_micros().max(0) as u64
    }
}

/// Cache store persisting entries below a root directory
#[derive(Debug, Clone)]
pub struct LocalCacheStore {
    root: PathBuf,
}

impl LocalCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<data dir>/gantry/cache`, falling back to the working directory
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gantry")
            .join("cache")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(Sha256::digest(key.as_bytes())))
    }

    async fn load_entries(&self) -> Result<Vec<EntryMetadata>, CacheError> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            // entries still being staged
            if item.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let metadata_path = item.path().join(METADATA_FILE);
            let raw = match tokio::fs::read(&metadata_path).await {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            match serde_json::from_slice::<EntryMetadata>(&raw) {
                Ok(meta) => entries.push(meta),
                Err(e) => warn!("Skipping unreadable cache entry {}: {}", metadata_path.display(), e),
            }
        }
        Ok(entries)
    }

    /// Copy `paths` and the entry metadata into `staging`
    async fn stage(&self, staging: &Path, key: &str, root: &Path, paths: &[PathBuf]) -> Result<(), CacheError> {
        let blobs = staging.join(BLOB_DIR);
        tokio::fs::create_dir_all(&blobs).await?;

        for (n, path) in paths.iter().enumerate() {
            tokio::fs::copy(path, blobs.join(n.to_string())).await?;
        }
        let meta = EntryMetadata {
            key: key.to_string(),
            stored_at: Utc::now(),
            files: paths.iter().map(|p| stored_path(root, p)).collect(),
        };
        tokio::fs::write(staging.join(METADATA_FILE), serde_json::to_vec_pretty(&meta)?).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for LocalCacheStore {
    async fn restore(
        &self,
        root: &Path,
        primary_key: &str,
        restore_keys: &[String],
    ) -> Result<RestoreResult, CacheError> {
        let entries = self.load_entries().await?;
        let selected = select_entry(
            entries.iter().map(|m| (m.key.as_str(), m.sequence())),
            primary_key,
            restore_keys,
        );
        let Some((key, kind)) = selected else {
            return Ok(RestoreResult::miss());
        };
        let Some(meta) = entries.iter().find(|m| m.key == key) else {
            return Ok(RestoreResult::miss());
        };

        let blobs = self.entry_dir(&key).join(BLOB_DIR);
        let mut paths = Vec::with_capacity(meta.files.len());
        for (n, stored) in meta.files.iter().enumerate() {
            let target = restore_target(root, stored);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(blobs.join(n.to_string()), &target).await?;
            paths.push(target);
        }
        debug!("Restored {} files from {} ({:?})", paths.len(), key, kind);

        Ok(RestoreResult {
            matched_key: Some(key),
            kind,
            paths,
        })
    }

    async fn save(&self, key: &str, root: &Path, paths: &[PathBuf]) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let staging = self.root.join(format!(".staging-{}", Uuid::new_v4()));
        if let Err(e) = self.stage(&staging, key, root, paths).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        let target = self.entry_dir(key);
        if tokio::fs::metadata(&target).await.is_ok() {
            tokio::fs::remove_dir_all(&target).await?;
        }
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }
        debug!("Saved {} files under cache key {} in {}", paths.len(), key, target.display());
        Ok(())
    }
}
