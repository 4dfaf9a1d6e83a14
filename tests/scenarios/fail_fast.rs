//! Test: Fail-Fast - a failed instance cancels its siblings, never other jobs

use crate::helpers::*;
use gantry::core::{JobFailure, JobStatus};
use gantry::execution::{ExecutionEvent, SchedulingStrategy};
use std::time::Duration;
use tempfile::TempDir;

fn matrix_yaml(fail_fast: bool) -> String {
    format!(
        r#"
name: CI
jobs:
  build:
    strategy:
      fail-fast: {}
      matrix:
        os: [a, b, c]
    steps:
      - name: Test
        run: cargo test
  lint:
    steps:
      - name: Clippy
        run: cargo clippy
"#,
        fail_fast
    )
}

/// Later siblings of a failed instance never start
#[tokio::test]
async fn test_fail_fast_cancels_pending_siblings() {
    let runner = MockRunner::new().fail_in("cargo test", "build-b");
    let report = run_yaml(&matrix_yaml(true), &runner, SchedulingStrategy::Sequential).await;

    assert_status(&report, "build-a", JobStatus::Succeeded);
    assert_status(&report, "build-b", JobStatus::Failed);
    assert_status(&report, "build-c", JobStatus::Cancelled);
    assert!(runner.commands_of("build-c").is_empty());

    // fail-fast is scoped to one job's instances
    assert_status(&report, "lint", JobStatus::Succeeded);

    assert!(!report.is_success());
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.state.cancelled, 1);
    assert!(matches!(
        report.instance("build-b").unwrap().failure,
        Some(JobFailure::StepFailed { ref step, .. }) if step == "Test"
    ));
}

/// Without fail-fast every sibling runs to its own end
#[tokio::test]
async fn test_fail_fast_disabled() {
    let runner = MockRunner::new().fail_in("cargo test", "build-b");
    let report = run_yaml(&matrix_yaml(false), &runner, SchedulingStrategy::Sequential).await;

    assert_status(&report, "build-a", JobStatus::Succeeded);
    assert_status(&report, "build-b", JobStatus::Failed);
    assert_status(&report, "build-c", JobStatus::Succeeded);
    assert_eq!(runner.instance_order(), vec!["build-a", "build-b", "build-c", "lint"]);
    assert_eq!(report.exit_code(), 1);
}

/// With one instance at a time per group, parallel dispatch behaves like sequential
#[tokio::test]
async fn test_fail_fast_with_group_limit() {
    let yaml = r#"
name: CI
jobs:
  build:
    strategy:
      max-parallel: 1
      matrix:
        os: [a, b, c, d]
    steps:
      - name: Test
        run: cargo test
"#;
    let runner = MockRunner::new().fail_in("cargo test", "build-a");
    let report = run_yaml(yaml, &runner, SchedulingStrategy::Parallel).await;

    assert_status(&report, "build-a", JobStatus::Failed);
    for id in ["build-b", "build-c", "build-d"] {
        assert_status(&report, id, JobStatus::Cancelled);
    }
    assert_eq!(runner.instance_order(), vec!["build-a"]);
}

/// A running sibling stops at its next step boundary
#[tokio::test]
async fn test_running_sibling_stops_at_step_boundary() {
    let yaml = r#"
name: CI
jobs:
  build:
    strategy:
      matrix:
        os: [a, b]
    steps:
      - name: Warm up
        if: matrix.os == 'b'
        run: warm-up
      - name: Check
        run: check
      - name: Package
        run: package
"#;
    let runner = MockRunner::new()
        .delay("warm-up", Duration::from_millis(400))
        .fail_in("check", "build-a");
    let workspace = TempDir::new().unwrap();
    let (engine, events) = test_engine(&runner, test_config(&workspace, SchedulingStrategy::Parallel));
    let report = engine.run(&[pipeline_from_yaml(yaml)]).await.unwrap();

    assert_status(&report, "build-a", JobStatus::Failed);
    assert_status(&report, "build-b", JobStatus::Cancelled);
    assert_steps_executed(&report, "build-b", &["Warm up"]);
    assert_eq!(skip_reason(&report, "build-b", "Check").as_deref(), Some("job cancelled"));
    assert_eq!(skip_reason(&report, "build-b", "Package").as_deref(), Some("job cancelled"));
    assert_eq!(runner.commands_of("build-b"), vec!["warm-up"]);

    let cancelled: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::JobCancelled { instance, .. } => Some(instance.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(cancelled, vec!["build-b"]);
}
