//! Content-addressed build caches
//!
//! A cache step resolves a primary key and an ordered list of restore-key
//! prefixes, restores the best match from a [`CacheStore`], and schedules a
//! save under the primary key once the job body has run. An exact hit needs
//! no save; a prefix hit or a miss does.

pub mod key;
pub mod local;
pub mod memory;

pub use key::{hash_file_contents, resolve_keys, CacheKeyResolver, ResolvedKeys};
pub use local::LocalCacheStore;
pub use memory::InMemoryCacheStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("invalid cache spec: {0}")]
    InvalidSpec(String),
}

/// When to save the cache after the job body ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SavePolicy {
    /// Save only when the job succeeded
    #[default]
    Success,
    /// Save regardless of the job outcome
    Always,
}

/// Declarative cache configuration of a cache step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpec {
    /// Primary key template, e.g. `{runner.os}-cargo-{hash}`
    pub key: String,

    /// Restore-key templates, each a prefix of the primary key pattern
    #[serde(default)]
    pub restore_keys: Vec<String>,

    /// Path globs to persist
    pub paths: Vec<String>,

    /// Files whose contents feed the `{hash}` placeholder
    #[serde(default)]
    pub hash_files: Vec<String>,

    #[serde(default)]
    pub save: SavePolicy,
}

impl CacheSpec {
    pub fn new<I, S>(key: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            restore_keys: Vec::new(),
            paths: paths.into_iter().map(Into::into).collect(),
            hash_files: Vec::new(),
            save: SavePolicy::Success,
        }
    }

    pub fn with_restore_key(mut self, template: impl Into<String>) -> Self {
        self.restore_keys.push(template.into());
        self
    }

    pub fn with_hash_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hash_files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_save_policy(mut self, save: SavePolicy) -> Self {
        self.save = save;
        self
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.key.trim().is_empty() {
            return Err(CacheError::InvalidSpec("cache key must not be empty".to_string()));
        }
        if self.paths.is_empty() {
            return Err(CacheError::InvalidSpec("cache must declare at least one path".to_string()));
        }
        Ok(())
    }
}

/// How a restore request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    /// The primary key was found
    Exact,
    /// A restore-key prefix matched a stored key
    Prefix,
    /// Nothing matched; not an error
    Miss,
}

impl MatchKind {
    /// Whether the primary key must be saved after the job body
    pub fn needs_save(&self) -> bool {
        !matches!(self, MatchKind::Exact)
    }
}

/// Result of a store restore call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResult {
    pub matched_key: Option<String>,
    pub kind: MatchKind,
    /// Files written back into place
    pub paths: Vec<PathBuf>,
}

impl RestoreResult {
    pub fn miss() -> Self {
        Self {
            matched_key: None,
            kind: MatchKind::Miss,
            paths: Vec::new(),
        }
    }
}

/// Cache step outcome recorded on the step log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOutcome {
    pub primary_key: String,
    pub restore_keys: Vec<String>,
    pub matched_key: Option<String>,
    pub kind: MatchKind,
    pub restored_files: usize,
}

/// Shared keyed store for cache entries.
///
/// Entries are written under fully resolved keys, so concurrent instances
/// with distinct keys never contend for the same entry. Files below the
/// workspace are stored relative to it and restored into whichever
/// workspace asks, so one entry serves every checkout.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Try the primary key exactly, then each restore key as a prefix,
    /// writing the matched files below `root`
    async fn restore(
        &self,
        root: &Path,
        primary_key: &str,
        restore_keys: &[String],
    ) -> Result<RestoreResult, CacheError>;

    /// Persist `paths` under `key`, replacing any existing entry
    async fn save(&self, key: &str, root: &Path, paths: &[PathBuf]) -> Result<(), CacheError>;
}

/// Form a cached path is stored in: relative when it lies below `root`
pub fn stored_path(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Where a stored path is written back when restoring into `root`
pub fn restore_target(root: &Path, stored: &Path) -> PathBuf {
    if stored.is_absolute() {
        stored.to_path_buf()
    } else {
        root.join(stored)
    }
}

/// Pick the entry to restore from `(key, stored_sequence)` pairs.
///
/// The primary key wins when present. Otherwise restore keys are tried in
/// the given order (most specific first); among stored keys sharing the
/// first matching prefix the most recently stored one wins.
pub fn select_entry<'a, I>(
    entries: I,
    primary_key: &str,
    restore_keys: &[String],
) -> Option<(String, MatchKind)>
where
    I: IntoIterator<Item = (&'a str, u64)>,
{
    let entries: Vec<(&str, u64)> = entries.into_iter().collect();

    if entries.iter().any(|(key, _)| *key == primary_key) {
        return Some((primary_key.to_string(), MatchKind::Exact));
    }

    restore_keys.iter().find_map(|prefix| {
        entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix.as_str()))
            .max_by_key(|(_, seq)| *seq)
            .map(|(key, _)| (key.to_string(), MatchKind::Prefix))
    })
}
