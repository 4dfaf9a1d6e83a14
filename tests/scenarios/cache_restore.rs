//! Test: Cache Restore - exact hits, prefix fallbacks and save policies

use crate::helpers::*;
use gantry::cache::{hash_file_contents, InMemoryCacheStore, LocalCacheStore, MatchKind};
use gantry::core::JobStatus;
use gantry::execution::{ExecutionEngine, RunReport, SchedulingStrategy};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const DEPS_YAML: &str = r#"
name: CI
jobs:
  build:
    steps:
      - name: Dependencies
        cache:
          key: "deps-{hash}"
          restore-keys: ["deps-"]
          paths: [vendor]
          hash-files: [Cargo.lock]
      - name: Fetch
        run: cargo fetch
"#;

struct CacheHarness {
    workspace: TempDir,
    runner: MockRunner,
    store: Arc<InMemoryCacheStore>,
    engine: ExecutionEngine<MockRunner>,
}

impl CacheHarness {
    fn new() -> Self {
        Self::with_runner(MockRunner::new())
    }

    fn with_runner(runner: MockRunner) -> Self {
        let workspace = TempDir::new().unwrap();
        let runner = runner.writes("cargo fetch", "vendor/dep.txt", "fetched");
        let store = Arc::new(InMemoryCacheStore::new());
        let (engine, _) = test_engine(&runner, test_config(&workspace, SchedulingStrategy::Sequential));
        let engine = engine.with_cache_store(store.clone());
        Self {
            workspace,
            runner,
            store,
            engine,
        }
    }

    fn lockfile(&self, contents: &str) -> String {
        let path = self.workspace.path().join("Cargo.lock");
        fs::write(&path, contents).unwrap();
        format!("deps-{}", hash_file_contents(&[path]).unwrap())
    }

    fn clear_vendor(&self) {
        let _ = fs::remove_dir_all(self.workspace.path().join("vendor"));
    }

    async fn run(&self, yaml: &str) -> RunReport {
        self.engine.run(&[pipeline_from_yaml(yaml)]).await.unwrap()
    }
}

fn cache_kind(report: &RunReport, instance: &str, step: &str) -> (MatchKind, Option<String>) {
    let outcome = report
        .instance(instance)
        .and_then(|i| i.step(step))
        .and_then(|s| s.cache.clone())
        .expect("cache outcome recorded");
    (outcome.kind, outcome.matched_key)
}

#[tokio::test]
async fn test_miss_then_exact_hit() {
    let harness = CacheHarness::new();
    let key = harness.lockfile("serde 1.0");

    let first = harness.run(DEPS_YAML).await;
    assert_status(&first, "build", JobStatus::Succeeded);
    assert_eq!(cache_kind(&first, "build", "Dependencies"), (MatchKind::Miss, None));
    assert_eq!(first.instance("build").unwrap().saved_cache_keys, vec![key.clone()]);
    assert_eq!(harness.store.keys().await, vec![key.clone()]);

    harness.clear_vendor();
    let second = harness.run(DEPS_YAML).await;
    assert_eq!(cache_kind(&second, "build", "Dependencies"), (MatchKind::Exact, Some(key.clone())));
    assert!(second.instance("build").unwrap().saved_cache_keys.is_empty());
    assert_eq!(
        fs::read_to_string(harness.workspace.path().join("vendor/dep.txt")).unwrap(),
        "fetched"
    );
    assert_eq!(harness.runner.commands().len(), 2);
}

/// A changed lockfile falls back to the restore prefix and saves a new key
#[tokio::test]
async fn test_prefix_fallback_saves_new_key() {
    let harness = CacheHarness::new();
    let old_key = harness.lockfile("serde 1.0");
    harness.run(DEPS_YAML).await;

    harness.clear_vendor();
    let new_key = harness.lockfile("serde 1.1");
    assert_ne!(old_key, new_key);

    let report = harness.run(DEPS_YAML).await;
    assert_eq!(cache_kind(&report, "build", "Dependencies"), (MatchKind::Prefix, Some(old_key.clone())));
    assert!(harness.workspace.path().join("vendor/dep.txt").exists());

    let mut expected = vec![old_key, new_key];
    expected.sort();
    assert_eq!(harness.store.keys().await, expected);
}

/// Failed jobs only save caches marked `save: always`
#[tokio::test]
async fn test_save_policy_after_failure() {
    let yaml = r#"
name: CI
jobs:
  build:
    steps:
      - name: Registry
        cache:
          key: registry-{job.id}
          paths: [vendor]
      - name: Toolchain
        cache:
          key: toolchain-{job.id}
          paths: [vendor]
          save: always
      - name: Fetch
        run: cargo fetch
      - name: Test
        run: cargo test
"#;
    let harness = CacheHarness::with_runner(MockRunner::new().exit_code("cargo test", 1));

    let report = harness.run(yaml).await;
    assert_status(&report, "build", JobStatus::Failed);
    assert_eq!(harness.store.keys().await, vec!["toolchain-build".to_string()]);
}

/// Matrix values in the key give every instance its own entry
#[tokio::test]
async fn test_keys_are_per_instance() {
    let yaml = r#"
name: CI
jobs:
  build:
    strategy:
      matrix:
        os: [linux, macos]
    steps:
      - name: Target
        cache:
          key: target-{matrix.os}
          paths: [vendor]
      - name: Fetch
        run: cargo fetch
"#;
    let harness = CacheHarness::new();
    let report = harness.run(yaml).await;

    assert!(report.is_success());
    assert_eq!(
        harness.store.keys().await,
        vec!["target-linux".to_string(), "target-macos".to_string()]
    );
    assert_eq!(cache_kind(&report, "build-macos", "Target").0, MatchKind::Miss);
}

/// Nothing to save is a warning, never a failure
#[tokio::test]
async fn test_empty_cache_paths_do_not_fail() {
    let yaml = r#"
name: CI
jobs:
  build:
    steps:
      - name: Missing
        cache:
          key: nothing-here
          paths: [does/not/exist]
      - name: Fetch
        run: cargo fetch
"#;
    let harness = CacheHarness::new();
    let report = harness.run(yaml).await;

    assert_status(&report, "build", JobStatus::Succeeded);
    assert!(harness.store.keys().await.is_empty());
}

/// One persistent store serves every checkout: a hit fills the workspace that asked
#[tokio::test]
async fn test_hit_restores_into_another_checkout() {
    let cache_root = TempDir::new().unwrap();
    let store = Arc::new(LocalCacheStore::new(cache_root.path()));
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    for checkout in [&first, &second] {
        fs::write(checkout.path().join("Cargo.lock"), "serde 1.0").unwrap();
    }

    let fetching = MockRunner::new().writes("cargo fetch", "vendor/dep.txt", "fetched");
    let (engine, _) = test_engine(&fetching, test_config(&first, SchedulingStrategy::Sequential));
    let saved = engine
        .with_cache_store(store.clone())
        .run(&[pipeline_from_yaml(DEPS_YAML)])
        .await
        .unwrap();
    let key = saved.instance("build").unwrap().saved_cache_keys[0].clone();
    fs::remove_dir_all(first.path().join("vendor")).unwrap();

    // this runner fetches nothing, so only the cache can fill `vendor`
    let offline = MockRunner::new();
    let (engine, _) = test_engine(&offline, test_config(&second, SchedulingStrategy::Sequential));
    let report = engine
        .with_cache_store(store.clone())
        .run(&[pipeline_from_yaml(DEPS_YAML)])
        .await
        .unwrap();

    assert_eq!(cache_kind(&report, "build", "Dependencies"), (MatchKind::Exact, Some(key)));
    assert_eq!(
        fs::read_to_string(second.path().join("vendor/dep.txt")).unwrap(),
        "fetched"
    );
    assert!(!first.path().join("vendor").exists());
}
