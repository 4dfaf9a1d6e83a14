//! Cache key derivation

use crate::cache::{CacheError, CacheSpec};
use crate::core::context::InstanceContext;
use crate::workspace;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Substituted keys for one cache step of one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKeys {
    pub primary: String,
    /// Most specific first
    pub restore_keys: Vec<String>,
    pub content_hash: String,
}

/// Hash file contents independently of their paths, order and timestamps.
///
/// Each file is hashed on its own; the sorted per-file digests are then
/// hashed together. Returns an empty string when no files are given.
pub fn hash_file_contents(files: &[PathBuf]) -> Result<String, std::io::Error> {
    if files.is_empty() {
        return Ok(String::new());
    }

    let mut digests = Vec::with_capacity(files.len());
    for file in files {
        let bytes = std::fs::read(file)?;
        digests.push(Sha256::digest(&bytes).to_vec());
    }
    digests.sort();

    let mut combined = Sha256::new();
    for digest in &digests {
        combined.update(digest);
    }
    Ok(hex::encode(combined.finalize()))
}

/// Render key templates against an instance and a precomputed content hash
pub fn resolve_keys(spec: &CacheSpec, context: &InstanceContext, content_hash: &str) -> ResolvedKeys {
    let mut extra = HashMap::new();
    extra.insert("hash".to_string(), content_hash.to_string());

    let primary = context.render(&spec.key, &extra);

    let mut restore_keys: Vec<String> = Vec::new();
    for template in &spec.restore_keys {
        let rendered = context.render(template, &extra);
        if rendered.is_empty() {
            debug!("Dropping empty restore key rendered from '{}'", template);
            continue;
        }
        if !restore_keys.contains(&rendered) {
            restore_keys.push(rendered);
        }
    }
    // most specific prefix first; declaration order breaks ties
    restore_keys.sort_by(|a, b| b.len().cmp(&a.len()));

    ResolvedKeys {
        primary,
        restore_keys,
        content_hash: content_hash.to_string(),
    }
}

/// Resolves cache keys for instances running in one workspace
#[derive(Debug, Clone)]
pub struct CacheKeyResolver {
    workspace: PathBuf,
}

impl CacheKeyResolver {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Hash the spec's `hash_files` and substitute every template
    pub fn resolve(&self, spec: &CacheSpec, context: &InstanceContext) -> Result<ResolvedKeys, CacheError> {
        let files = workspace::resolve_globs(&self.workspace, &spec.hash_files);
        if files.is_empty() && !spec.hash_files.is_empty() {
            warn!(
                "Cache hash files {:?} matched nothing in {}",
                spec.hash_files,
                self.workspace.display()
            );
        }
        let content_hash = hash_file_contents(&files)?;
        let keys = resolve_keys(spec, context, &content_hash);
        debug!("Resolved cache key {} (restore keys {:?})", keys.primary, keys.restore_keys);
        Ok(keys)
    }
}
