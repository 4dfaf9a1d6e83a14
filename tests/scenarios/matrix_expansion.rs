//! Test: Matrix Expansion - instances, identity and MATRIX_* exports

use crate::helpers::*;
use gantry::core::{Job, JobStatus, MatrixSpec, PipelineDefinition, PipelineError, Step};
use gantry::execution::SchedulingStrategy;
use tempfile::TempDir;

const MATRIX_YAML: &str = r#"
name: CI
jobs:
  build:
    strategy:
      fail-fast: false
      matrix:
        os: [linux, macos]
        toolchain: [stable, nightly]
        exclude:
          - os: macos
            toolchain: nightly
        include:
          - os: linux
            toolchain: nightly
            experimental: true
          - os: windows
            toolchain: stable
    steps:
      - name: Build
        run: cargo build
"#;

/// Excludes drop combinations, matching includes merge, the rest append
#[tokio::test]
async fn test_exclude_then_include() {
    let runner = MockRunner::new();
    let report = run_yaml(MATRIX_YAML, &runner, SchedulingStrategy::Sequential).await;

    assert_eq!(
        instance_ids(&report),
        vec![
            "build-linux-stable",
            "build-linux-nightly-true",
            "build-macos-stable",
            "build-windows-stable",
        ]
    );
    assert!(report.is_success());
    assert_eq!(runner.commands().len(), 4);

    let merged = report.instance("build-linux-nightly-true").unwrap();
    assert_eq!(merged.context.matrix.get("experimental"), Some("true"));
    assert_eq!(merged.name, "build (linux, nightly, true)");
}

/// Every step sees its instance's matrix values as environment variables
#[tokio::test]
async fn test_matrix_values_exported_to_steps() {
    let runner = MockRunner::new();
    run_yaml(MATRIX_YAML, &runner, SchedulingStrategy::Sequential).await;

    let executed = runner.executed();
    let first = &executed[0];
    assert_eq!(first.env.get("MATRIX_OS").map(String::as_str), Some("linux"));
    assert_eq!(first.env.get("MATRIX_TOOLCHAIN").map(String::as_str), Some("stable"));
    assert_eq!(first.env.get("GANTRY_JOB").map(String::as_str), Some("build"));
    assert_eq!(first.env.get("GANTRY_PIPELINE").map(String::as_str), Some("CI"));
    assert!(!first.env.contains_key("MATRIX_EXPERIMENTAL"));

    let windows = executed
        .iter()
        .find(|c| c.instance() == "build-windows-stable")
        .expect("windows instance ran");
    assert_eq!(windows.env.get("MATRIX_OS").map(String::as_str), Some("windows"));

    let merged = executed
        .iter()
        .find(|c| c.instance() == "build-linux-nightly-true")
        .expect("merged instance ran");
    assert_eq!(merged.env.get("MATRIX_EXPERIMENTAL").map(String::as_str), Some("true"));
}

/// A job without a matrix is exactly one instance named after the job
#[tokio::test]
async fn test_job_without_matrix() {
    let yaml = r#"
name: CI
jobs:
  lint:
    name: Lint
    steps:
      - name: Clippy
        run: cargo clippy
"#;
    let runner = MockRunner::new();
    let report = run_yaml(yaml, &runner, SchedulingStrategy::Parallel).await;

    assert_eq!(instance_ids(&report), vec!["lint"]);
    assert_status(&report, "lint", JobStatus::Succeeded);
    assert_eq!(report.instance("lint").unwrap().name, "Lint");
}

/// A malformed matrix anywhere aborts the run before any instance starts
#[tokio::test]
async fn test_malformed_matrix_runs_nothing() {
    let healthy = PipelineDefinition::new("Lint")
        .with_job(Job::new("clippy").with_step(Step::run("Clippy", "cargo clippy")));
    let broken = PipelineDefinition::new("CI").with_job(
        Job::new("build")
            .with_matrix(MatrixSpec::new().with_axis("os", Vec::<String>::new()))
            .with_step(Step::run("Build", "cargo build")),
    );

    let runner = MockRunner::new();
    let workspace = TempDir::new().unwrap();
    let (engine, events) = test_engine(&runner, test_config(&workspace, SchedulingStrategy::Parallel));

    let result = engine.run(&[healthy, broken]).await;
    assert!(matches!(result, Err(PipelineError::MalformedMatrix { ref job, .. }) if job == "build"));
    assert!(runner.commands().is_empty());
    assert!(events.lock().unwrap().is_empty());
}

/// Non-list axes are rejected when the definition is loaded
#[test]
fn test_non_list_axis_rejected_on_load() {
    let yaml = r#"
name: CI
jobs:
  build:
    strategy:
      matrix:
        os: linux
    steps:
      - name: Build
        run: cargo build
"#;
    let loaded = gantry::core::config::PipelineConfig::from_yaml(yaml).and_then(|c| c.to_definition());
    let error = loaded.expect_err("non-list axis must be rejected");
    assert!(format!("{:#}", error).contains("malformed matrix"), "{:#}", error);
}
