//! Test: Artifacts - publication, missing files and publish policies

use crate::helpers::*;
use gantry::artifact::{ArtifactStore, InMemoryArtifactStore, LocalArtifactStore};
use gantry::core::{JobFailure, JobStatus};
use gantry::execution::{ExecutionEvent, RunReport, SchedulingStrategy};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn run_with_store(yaml: &str, runner: &MockRunner) -> (RunReport, Arc<InMemoryArtifactStore>, Vec<ExecutionEvent>) {
    let workspace = TempDir::new().unwrap();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, events) = test_engine(runner, test_config(&workspace, SchedulingStrategy::Sequential));
    let engine = engine.with_artifact_store(store.clone());
    let report = engine.run(&[pipeline_from_yaml(yaml)]).await.unwrap();
    let events = events.lock().unwrap().clone();
    (report, store, events)
}

#[tokio::test]
async fn test_publish_per_instance() {
    let yaml = r#"
name: Release
jobs:
  build:
    strategy:
      matrix:
        os: [linux, macos]
    steps:
      - name: Build
        run: cargo build --release
    artifacts:
      - name: app-{matrix.os}
        paths: [dist/*]
        retention_days: 7
"#;
    let runner = MockRunner::new().writes("cargo build --release", "dist/app", "binary");
    let (report, store, events) = run_with_store(yaml, &runner).await;

    assert!(report.is_success());
    assert_eq!(store.names().await, vec!["app-linux".to_string(), "app-macos".to_string()]);
    assert_eq!(
        store.contents("app-linux", Path::new("dist/app")).await,
        Some(b"binary".to_vec())
    );

    let linux = report.instance("build-linux").unwrap();
    assert_eq!(linux.artifacts.len(), 1);
    assert_eq!(linux.artifacts[0].retention_days, Some(7));
    assert_eq!(linux.artifacts[0].files, vec![Path::new("dist/app").to_path_buf()]);

    let published = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::ArtifactPublished { .. }))
        .count();
    assert_eq!(published, 2);
}

/// Missing files demote an otherwise successful instance under the default policy
#[tokio::test]
async fn test_missing_files_fail_the_job() {
    let yaml = r#"
name: Release
jobs:
  build:
    steps:
      - name: Build
        run: cargo build
    artifacts:
      - name: app
        paths: [dist/app]
"#;
    let runner = MockRunner::new();
    let (report, store, _) = run_with_store(yaml, &runner).await;

    assert_status(&report, "build", JobStatus::Failed);
    assert_eq!(
        report.instance("build").unwrap().failure,
        Some(JobFailure::ArtifactMissing {
            artifact: "app".to_string(),
            pattern: "dist/app".to_string(),
        })
    );
    assert!(store.names().await.is_empty());
}

#[tokio::test]
async fn test_missing_files_tolerated_by_policy() {
    let yaml = r#"
name: Release
jobs:
  build:
    steps:
      - name: Build
        run: cargo build
    artifacts:
      - name: coverage
        paths: [coverage/]
        if_no_files_found: warn
      - name: docs
        paths: [target/doc]
        if_no_files_found: ignore
"#;
    let runner = MockRunner::new();
    let (report, store, _) = run_with_store(yaml, &runner).await;

    assert_status(&report, "build", JobStatus::Succeeded);
    assert!(store.names().await.is_empty());
    assert!(report.instance("build").unwrap().artifacts.is_empty());
}

/// `when: always` captures diagnostics of a failed job; the default does not
#[tokio::test]
async fn test_publish_policy_on_failure() {
    let yaml = r#"
name: CI
jobs:
  test:
    steps:
      - name: Test
        run: cargo test
    artifacts:
      - name: test-logs
        paths: [logs/*.log]
        when: always
      - name: report
        paths: [logs/*.log]
"#;
    let runner = MockRunner::new()
        .writes("cargo test", "logs/test.log", "3 passed, 1 failed")
        .exit_code("cargo test", 101);
    let (report, store, _) = run_with_store(yaml, &runner).await;

    assert_status(&report, "test", JobStatus::Failed);
    assert_eq!(store.names().await, vec!["test-logs".to_string()]);
    assert!(matches!(
        report.instance("test").unwrap().failure,
        Some(JobFailure::StepFailed { ref step, .. }) if step == "Test"
    ));
}

/// Artifacts are immutable: a second publish of one name fails that instance
#[tokio::test]
async fn test_duplicate_name_fails_second_publisher() {
    let yaml = r#"
name: Release
jobs:
  build:
    strategy:
      fail-fast: false
      matrix:
        os: [linux, macos]
    steps:
      - name: Build
        run: cargo build
    artifacts:
      - name: app
        paths: [dist/app]
"#;
    let runner = MockRunner::new().writes("cargo build", "dist/app", "binary");
    let (report, store, _) = run_with_store(yaml, &runner).await;

    assert_status(&report, "build-linux", JobStatus::Succeeded);
    assert_status(&report, "build-macos", JobStatus::Failed);
    assert!(matches!(
        report.instance("build-macos").unwrap().failure,
        Some(JobFailure::ArtifactPublish { ref artifact, .. }) if artifact == "app"
    ));
    assert_eq!(store.names().await, vec!["app".to_string()]);
}

/// A persistent store accepts the same pipeline run after run
#[tokio::test]
async fn test_repeated_runs_share_a_local_store() {
    let yaml = r#"
name: Release
jobs:
  build:
    steps:
      - name: Build
        run: cargo build
    artifacts:
      - name: bin-{instance.id}
        paths: [dist/app]
"#;
    let store_root = TempDir::new().unwrap();
    let store = Arc::new(LocalArtifactStore::new(store_root.path()));
    let runner = MockRunner::new().writes("cargo build", "dist/app", "binary");
    let workspace = TempDir::new().unwrap();

    let mut run_ids = Vec::new();
    for _ in 0..2 {
        let (engine, _) = test_engine(&runner, test_config(&workspace, SchedulingStrategy::Sequential));
        let report = engine
            .with_artifact_store(store.clone())
            .run(&[pipeline_from_yaml(yaml)])
            .await
            .unwrap();
        assert_status(&report, "build", JobStatus::Succeeded);
        run_ids.push(report.state.run_id);
    }

    assert_ne!(run_ids[0], run_ids[1]);
    for run_id in run_ids {
        let published = store.get(run_id, "bin-build").await.unwrap().unwrap();
        assert_eq!(published.run_id, run_id);
        assert_eq!(
            std::fs::read_to_string(store.file_path(run_id, "bin-build", Path::new("dist/app"))).unwrap(),
            "binary"
        );
    }
}

/// `{run.id}` renders the id of the run that publishes
#[tokio::test]
async fn test_run_id_in_artifact_name() {
    let yaml = r#"
name: Release
jobs:
  build:
    steps:
      - name: Build
        run: cargo build
    artifacts:
      - name: app-{run.id}
        paths: [dist/app]
"#;
    let runner = MockRunner::new().writes("cargo build", "dist/app", "binary");
    let (report, store, _) = run_with_store(yaml, &runner).await;

    assert!(report.is_success());
    assert_eq!(store.names().await, vec![format!("app-{}", report.state.run_id)]);
    let executed = runner.executed();
    assert_eq!(executed[0].env.get("GANTRY_RUN_ID"), Some(&report.state.run_id.to_string()));
}
