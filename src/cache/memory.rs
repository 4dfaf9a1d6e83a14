//! In-memory cache store, shared by every instance of a process

use crate::cache::{restore_target, select_entry, stored_path, CacheError, CacheStore, MatchKind, RestoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    /// Stored path and contents
    files: Vec<(PathBuf, Vec<u8>)>,
    seq: u64,
}

/// Cache store holding file snapshots in memory
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, Entry>>,
    counter: AtomicU64,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn restore(
        &self,
        root: &Path,
        primary_key: &str,
        restore_keys: &[String],
    ) -> Result<RestoreResult, CacheError> {
        let entry = {
            let entries = self.entries.read().await;
            let selected = select_entry(
                entries.iter().map(|(k, e)| (k.as_str(), e.seq)),
                primary_key,
                restore_keys,
            );
            match selected {
                Some((key, kind)) => entries.get(&key).cloned().map(|e| (key, kind, e)),
                None => None,
            }
        };

        let Some((key, kind, entry)) = entry else {
            return Ok(RestoreResult::miss());
        };

        let mut paths = Vec::with_capacity(entry.files.len());
        for (stored, bytes) in &entry.files {
            let target = restore_target(root, stored);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, bytes).await?;
            paths.push(target);
        }
        debug!("Restored {} files from cache entry {} ({:?})", paths.len(), key, kind);

        Ok(RestoreResult {
            matched_key: Some(key),
            kind,
            paths,
        })
    }

    async fn save(&self, key: &str, root: &Path, paths: &[PathBuf]) -> Result<(), CacheError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push((stored_path(root, path), tokio::fs::read(path).await?));
        }
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { files, seq });
        debug!("Saved {} files under cache key {}", paths.len(), key);
        Ok(())
    }
}
