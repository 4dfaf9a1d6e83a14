//! Test: Conditions - job and step guards over matrix, invocation and variables

use crate::helpers::*;
use gantry::core::JobStatus;
use gantry::execution::{ExecutionEvent, SchedulingStrategy};
use tempfile::TempDir;

const NIGHTLY_YAML: &str = r#"
name: CI
variables:
  deploy_target: staging
jobs:
  build:
    strategy:
      matrix:
        os: [linux, macos]
        channel: [stable, nightly]
    steps:
      - name: Build
        run: cargo build
      - name: Linux only
        if: matrix.os == 'linux'
        run: strip
      - name: Nightly only
        if: ${{ matrix.channel == 'nightly' && event.schedule == 'nightly' }}
        run: cargo +nightly miri test
  deploy:
    if: vars.deploy_target == 'production'
    steps:
      - name: Deploy
        run: deploy
  report:
    if: startsWith(event.ref, 'refs/tags/')
    steps:
      - name: Report
        run: report
"#;

#[tokio::test]
async fn test_step_conditions_use_matrix_and_invocation() {
    let runner = MockRunner::new();
    let workspace = TempDir::new().unwrap();
    let config = test_config(&workspace, SchedulingStrategy::Sequential).with_invocation("schedule", "nightly");
    let (engine, _) = test_engine(&runner, config);
    let report = engine.run(&[pipeline_from_yaml(NIGHTLY_YAML)]).await.unwrap();

    assert_steps_executed(&report, "build-linux-stable", &["Build", "Linux only"]);
    assert_steps_executed(&report, "build-linux-nightly", &["Build", "Linux only", "Nightly only"]);
    assert_steps_executed(&report, "build-macos-stable", &["Build"]);
    assert_steps_executed(&report, "build-macos-nightly", &["Build", "Nightly only"]);

    let reason = skip_reason(&report, "build-macos-stable", "Linux only").unwrap();
    assert!(reason.contains("matrix.os == 'linux'"), "{}", reason);

    // a skipped step does not fail its instance
    assert_status(&report, "build-macos-stable", JobStatus::Succeeded);
}

/// False job conditions skip the whole job, and skipped jobs count as success
#[tokio::test]
async fn test_job_conditions() {
    let runner = MockRunner::new();
    let workspace = TempDir::new().unwrap();
    let config = test_config(&workspace, SchedulingStrategy::Parallel).with_invocation("ref", "refs/tags/v1.0.0");
    let (engine, events) = test_engine(&runner, config);
    let report = engine.run(&[pipeline_from_yaml(NIGHTLY_YAML)]).await.unwrap();

    assert_status(&report, "deploy", JobStatus::Skipped);
    assert_status(&report, "report", JobStatus::Succeeded);
    assert!(runner.commands_of("deploy").is_empty());
    assert!(report.is_success());
    assert_eq!(report.state.skipped, 1);

    // without a nightly schedule no instance runs the nightly step
    assert!(!runner.commands().iter().any(|c| c.contains("miri")));

    let skipped: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::JobSkipped { instance, .. } => Some(instance.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec!["deploy"]);
}

/// Variable overrides change which jobs run
#[tokio::test]
async fn test_variables_drive_conditions() {
    let mut definition = pipeline_from_yaml(NIGHTLY_YAML);
    definition
        .variables
        .insert("deploy_target".to_string(), "production".to_string());

    let runner = MockRunner::new();
    let workspace = TempDir::new().unwrap();
    let (engine, _) = test_engine(&runner, test_config(&workspace, SchedulingStrategy::Sequential));
    let report = engine.run(&[definition]).await.unwrap();

    assert_status(&report, "deploy", JobStatus::Succeeded);
    assert_status(&report, "report", JobStatus::Skipped);
    assert_eq!(runner.commands_of("deploy"), vec!["deploy"]);
}

/// A condition that cannot be parsed evaluates to false instead of aborting
#[tokio::test]
async fn test_invalid_condition_is_false() {
    let yaml = r#"
name: CI
jobs:
  build:
    steps:
      - name: Broken guard
        if: matrix.os ==
        run: never
      - name: Build
        run: cargo build
"#;
    let definition = pipeline_from_yaml(yaml);
    assert_eq!(definition.condition_warnings().len(), 1);

    let runner = MockRunner::new();
    let workspace = TempDir::new().unwrap();
    let (engine, _) = test_engine(&runner, test_config(&workspace, SchedulingStrategy::Sequential));
    let report = engine.run(&[definition]).await.unwrap();

    assert_status(&report, "build", JobStatus::Succeeded);
    assert_eq!(runner.commands(), vec!["cargo build"]);
}
