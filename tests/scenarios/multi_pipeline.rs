//! Test: Multi Pipeline - independent pipelines sharing one run

use crate::helpers::*;
use gantry::artifact::InMemoryArtifactStore;
use gantry::core::JobStatus;
use gantry::execution::SchedulingStrategy;
use std::sync::Arc;
use tempfile::TempDir;

const BUILD_YAML: &str = r#"
name: Build
jobs:
  build:
    steps:
      - name: Compile
        run: cargo build
    artifacts:
      - name: bin-{instance.id}
        paths: [dist/app]
"#;

const LINT_YAML: &str = r#"
name: Lint
jobs:
  build:
    steps:
      - name: Clippy
        run: cargo clippy
    artifacts:
      - name: bin-{instance.id}
        paths: [dist/app]
"#;

/// Same job id in two pipelines: ids, env and artifact names stay distinct
#[tokio::test]
async fn test_shared_job_id_across_pipelines() {
    let runner = MockRunner::new()
        .writes("cargo build", "dist/app", "binary")
        .writes("cargo clippy", "dist/app", "linted");
    let workspace = TempDir::new().unwrap();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, _) = test_engine(&runner, test_config(&workspace, SchedulingStrategy::Sequential));
    let report = engine
        .with_artifact_store(store.clone())
        .run(&[pipeline_from_yaml(BUILD_YAML), pipeline_from_yaml(LINT_YAML)])
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(instance_ids(&report), vec!["build", "lint-build"]);
    assert_eq!(report.instance("build").unwrap().pipeline, "Build");
    assert_eq!(report.instance("lint-build").unwrap().pipeline, "Lint");
    assert_status(&report, "lint-build", JobStatus::Succeeded);

    assert_eq!(
        store.names_in(report.state.run_id).await,
        vec!["bin-build".to_string(), "bin-lint-build".to_string()]
    );

    let mut seen: Vec<String> = runner
        .executed()
        .iter()
        .map(|c| c.instance().to_string())
        .collect();
    seen.sort();
    assert_eq!(seen, vec!["build", "lint-build"]);
}

/// A failing pipeline does not cancel an independent one
#[tokio::test]
async fn test_pipelines_fail_independently() {
    let runner = MockRunner::new()
        .writes("cargo build", "dist/app", "binary")
        .exit_code("cargo clippy", 1);
    let workspace = TempDir::new().unwrap();
    let (engine, _) = test_engine(&runner, test_config(&workspace, SchedulingStrategy::Parallel));
    let report = engine
        .run(&[pipeline_from_yaml(BUILD_YAML), pipeline_from_yaml(LINT_YAML)])
        .await
        .unwrap();

    assert_status(&report, "build", JobStatus::Succeeded);
    assert_status(&report, "lint-build", JobStatus::Failed);
    assert_eq!(report.exit_code(), 1);
}
