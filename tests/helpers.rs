//! Test utilities for gantry scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use gantry::core::config::PipelineConfig;
use gantry::core::{JobStatus, PipelineDefinition, StepOutcome};
use gantry::execution::{EngineConfig, ExecutionEngine, ExecutionEvent, RunReport, SchedulingStrategy};
use gantry::runner::{CommandOutput, CommandRequest, CommandRunner, RunnerError};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// A command the mock runner saw
#[derive(Debug, Clone)]
pub struct ExecutedCommand {
    pub step: String,
    pub command: String,
    pub env: HashMap<String, String>,
    pub working_dir: PathBuf,
}

impl ExecutedCommand {
    pub fn instance(&self) -> &str {
        self.env.get("GANTRY_INSTANCE").map(String::as_str).unwrap_or_default()
    }
}

#[derive(Default)]
struct Script {
    exit_codes: HashMap<String, i32>,
    delays: HashMap<String, Duration>,
    exports: HashMap<String, HashMap<String, String>>,
    writes: HashMap<String, Vec<(String, String)>>,
    missing_tools: HashSet<String>,
    /// Fail when the instance id has this substring
    failing_instances: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct Recorder {
    executed: Mutex<Vec<ExecutedCommand>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Command runner scripted by command text; unknown commands exit 0
#[derive(Clone, Default)]
pub struct MockRunner {
    script: Arc<Mutex<Script>>,
    recorder: Arc<Recorder>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit_code(self, command: &str, code: i32) -> Self {
        self.script.lock().unwrap().exit_codes.insert(command.to_string(), code);
        self
    }

    /// `command` exits 1 only in instances whose id contains `instance`
    pub fn fail_in(self, command: &str, instance: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .failing_instances
            .entry(command.to_string())
            .or_default()
            .push(instance.to_string());
        self
    }

    pub fn delay(self, command: &str, delay: Duration) -> Self {
        self.script.lock().unwrap().delays.insert(command.to_string(), delay);
        self
    }

    pub fn export(self, command: &str, key: &str, value: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .exports
            .entry(command.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Write `contents` to `path` (relative to the working dir) when `command` runs
    pub fn writes(self, command: &str, path: &str, contents: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .writes
            .entry(command.to_string())
            .or_default()
            .push((path.to_string(), contents.to_string()));
        self
    }

    pub fn missing_tool(self, tool: &str) -> Self {
        self.script.lock().unwrap().missing_tools.insert(tool.to_string());
        self
    }

    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.recorder.executed.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.executed().into_iter().map(|c| c.command).collect()
    }

    /// Commands run by one instance, in order
    pub fn commands_of(&self, instance: &str) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|c| c.instance() == instance)
            .map(|c| c.command)
            .collect()
    }

    /// Instance ids in the order their first command ran
    pub fn instance_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for command in self.executed() {
            let id = command.instance().to_string();
            if !order.contains(&id) {
                order.push(id);
            }
        }
        order
    }

    /// Highest number of commands that ran at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.recorder.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, RunnerError> {
        let now = self.recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.peak.fetch_max(now, Ordering::SeqCst);
        self.recorder.executed.lock().unwrap().push(ExecutedCommand {
            step: request.step.clone(),
            command: request.command.clone(),
            env: request.env.clone(),
            working_dir: request.working_dir.clone(),
        });

        let (delay, mut exit_code, exports, writes, failing_in) = {
            let script = self.script.lock().unwrap();
            (
                script.delays.get(&request.command).copied(),
                script.exit_codes.get(&request.command).copied().unwrap_or(0),
                script.exports.get(&request.command).cloned().unwrap_or_default(),
                script.writes.get(&request.command).cloned().unwrap_or_default(),
                script.failing_instances.get(&request.command).cloned().unwrap_or_default(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let instance = request.env.get("GANTRY_INSTANCE").cloned().unwrap_or_default();
        if failing_in.iter().any(|needle| instance.contains(needle.as_str())) {
            exit_code = 1;
        }
        for (path, contents) in writes {
            let target = request.working_dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, contents)?;
        }

        self.recorder.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(CommandOutput {
            exit_code,
            stdout: format!("ran {}", request.command),
            stderr: String::new(),
            exported_env: exports,
        })
    }

    fn tool_available(&self, tool: &str) -> bool {
        !self.script.lock().unwrap().missing_tools.contains(tool)
    }
}

/// Parse a pipeline definition from YAML
pub fn pipeline_from_yaml(yaml: &str) -> PipelineDefinition {
    PipelineConfig::from_yaml(yaml)
        .and_then(|config| config.to_definition())
        .unwrap_or_else(|e| panic!("Failed to parse pipeline YAML: {:#}", e))
}

/// Engine config over a scratch workspace with an empty base environment
pub fn test_config(workspace: &TempDir, strategy: SchedulingStrategy) -> EngineConfig {
    EngineConfig::default()
        .with_strategy(strategy)
        .with_workspace(workspace.path())
        .with_base_env(HashMap::new())
}

/// Engine with in-memory stores that records every event
pub fn test_engine(
    runner: &MockRunner,
    config: EngineConfig,
) -> (ExecutionEngine<MockRunner>, Arc<Mutex<Vec<ExecutionEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let engine = ExecutionEngine::new(runner.clone(), config).with_event_handler(move |event| {
        sink.lock().unwrap().push(event);
    });
    (engine, events)
}

/// Run one YAML pipeline in a fresh workspace
pub async fn run_yaml(yaml: &str, runner: &MockRunner, strategy: SchedulingStrategy) -> RunReport {
    let workspace = TempDir::new().unwrap();
    let (engine, _) = test_engine(runner, test_config(&workspace, strategy));
    engine
        .run(&[pipeline_from_yaml(yaml)])
        .await
        .unwrap_or_else(|e| panic!("Run failed to start: {}", e))
}

/// Assert an instance ended with `expected`
pub fn assert_status(report: &RunReport, instance: &str, expected: JobStatus) {
    let found = report
        .instance(instance)
        .unwrap_or_else(|| panic!("Instance '{}' not found; have {:?}", instance, instance_ids(report)));
    assert_eq!(
        found.status, expected,
        "Instance '{}' should be {:?}, but was {:?} (failure: {:?})",
        instance, expected, found.status, found.failure
    );
}

/// Assert exactly these steps of an instance ran (succeeded or failed), in order
pub fn assert_steps_executed(report: &RunReport, instance: &str, expected: &[&str]) {
    let found = report
        .instance(instance)
        .unwrap_or_else(|| panic!("Instance '{}' not found", instance));
    let actual = found.executed_steps();
    assert_eq!(
        actual, expected,
        "Expected steps {:?} of '{}' to run, got {:?}",
        expected, instance, actual
    );
}

/// Skip reason recorded for a step
pub fn skip_reason(report: &RunReport, instance: &str, step: &str) -> Option<String> {
    let record = report.instance(instance)?.step(step)?;
    match &record.outcome {
        StepOutcome::Skipped { reason } => Some(reason.clone()),
        _ => None,
    }
}

pub fn instance_ids(report: &RunReport) -> Vec<String> {
    report.instances.iter().map(|i| i.id.clone()).collect()
}
