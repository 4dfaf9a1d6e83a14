//! Path glob resolution inside a workspace
//!
//! Patterns are relative to the workspace root unless absolute or starting
//! with `~/`. `*` and `?` never cross a `/`, `**` matches any depth. A
//! pattern naming a directory resolves to every file below it.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Resolve one pattern to the sorted list of matching files
pub fn resolve_glob(root: &Path, pattern: &str) -> Vec<PathBuf> {
    let full = absolute_pattern(root, pattern);

    let mut base = PathBuf::new();
    let mut rest: Vec<String> = Vec::new();
    for component in full.components() {
        let text = component.as_os_str().to_string_lossy().to_string();
        if rest.is_empty() && !has_glob_meta(&text) {
            base.push(component.as_os_str());
        } else {
            match component {
                Component::Normal(_) | Component::CurDir | Component::ParentDir => rest.push(text),
                _ => base.push(component.as_os_str()),
            }
        }
    }

    let mut files = if rest.is_empty() {
        files_under(&base)
    } else {
        let regex_source = glob_to_regex(&rest.join("/"));
        let matcher = match Regex::new(&regex_source) {
            Ok(re) => re,
            Err(e) => {
                warn!("Ignoring unusable glob '{}': {}", pattern, e);
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        for entry in WalkDir::new(&base).min_depth(1).follow_links(false).into_iter().filter_map(|e| e.ok()) {
            let rel = match entry.path().strip_prefix(&base) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if matcher.is_match(&rel) {
                if entry.file_type().is_dir() {
                    found.extend(files_under(entry.path()));
                } else {
                    found.push(entry.path().to_path_buf());
                }
            }
        }
        found
    };

    files.sort();
    files.dedup();
    debug!("Pattern '{}' resolved to {} files", pattern, files.len());
    files
}

/// Resolve several patterns into one sorted, de-duplicated list
pub fn resolve_globs<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = patterns
        .iter()
        .flat_map(|p| resolve_glob(root, p.as_ref()))
        .collect();
    files.sort();
    files.dedup();
    files
}

fn absolute_pattern(root: &Path, pattern: &str) -> PathBuf {
    if let Some(rest) = pattern.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    let path = Path::new(pattern);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn files_under(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    if !path.is_dir() {
        return Vec::new();
    }
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn has_glob_meta(text: &str) -> bool {
    text.contains('*') || text.contains('?')
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    out
}
