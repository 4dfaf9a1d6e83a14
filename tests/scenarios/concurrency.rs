//! Test: Concurrency - global strategy and per-job max_parallel bounds

use crate::helpers::*;
use gantry::core::JobStatus;
use gantry::execution::SchedulingStrategy;
use std::time::Duration;

fn wide_yaml(max_parallel: Option<usize>) -> String {
    let limit = max_parallel
        .map(|n| format!("      max_parallel: {}\n", n))
        .unwrap_or_default();
    format!(
        r#"
name: CI
jobs:
  build:
    strategy:
{}      matrix:
        shard: [1, 2, 3, 4, 5, 6]
    steps:
      - name: Work
        run: work
"#,
        limit
    )
}

#[tokio::test]
async fn test_group_max_parallel_is_respected() {
    let runner = MockRunner::new().delay("work", Duration::from_millis(100));
    let report = run_yaml(&wide_yaml(Some(2)), &runner, SchedulingStrategy::Parallel).await;

    assert!(report.is_success());
    assert_eq!(runner.commands().len(), 6);
    assert!(runner.peak_concurrency() <= 2, "peak was {}", runner.peak_concurrency());
}

#[tokio::test]
async fn test_global_limit_is_respected() {
    let runner = MockRunner::new().delay("work", Duration::from_millis(100));
    let report = run_yaml(&wide_yaml(None), &runner, SchedulingStrategy::LimitedParallel(3)).await;

    assert!(report.is_success());
    assert!(runner.peak_concurrency() <= 3, "peak was {}", runner.peak_concurrency());
}

#[tokio::test]
async fn test_sequential_runs_one_at_a_time_in_declaration_order() {
    let yaml = r#"
name: CI
jobs:
  build:
    strategy:
      matrix:
        os: [linux, macos]
    steps:
      - name: Build
        run: build
  test:
    steps:
      - name: Test
        run: test
"#;
    let runner = MockRunner::new().delay("build", Duration::from_millis(20));
    let report = run_yaml(yaml, &runner, SchedulingStrategy::Sequential).await;

    assert_eq!(runner.peak_concurrency(), 1);
    assert_eq!(runner.instance_order(), vec!["build-linux", "build-macos", "test"]);
    assert_eq!(instance_ids(&report), vec!["build-linux", "build-macos", "test"]);
}

/// Report order is declaration order no matter when instances finish
#[tokio::test]
async fn test_report_keeps_declaration_order() {
    let yaml = r#"
name: CI
jobs:
  slow:
    steps:
      - name: Slow
        run: slow
  fast:
    steps:
      - name: Fast
        run: fast
"#;
    let runner = MockRunner::new().delay("slow", Duration::from_millis(200));
    let report = run_yaml(yaml, &runner, SchedulingStrategy::Parallel).await;

    assert_eq!(instance_ids(&report), vec!["slow", "fast"]);
    assert_status(&report, "slow", JobStatus::Succeeded);
    assert_status(&report, "fast", JobStatus::Succeeded);
    assert_eq!(runner.commands().len(), 2);
}
