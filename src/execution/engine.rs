//! Main execution engine - orchestrates a whole run

use crate::{
    artifact::{ArtifactPublisher, ArtifactStore, InMemoryArtifactStore},
    cache::{CacheStore, InMemoryCacheStore, MatchKind},
    core::{
        error::{JobFailure, PipelineError},
        pipeline::PipelineDefinition,
        state::{ExecutionStatus, JobInstance, JobStatus, RunState, StepOutcome},
        step::StepDefaults,
    },
    execution::{
        executor::JobExecutor,
        scheduler::{ExecutionScheduler, InstanceGroup, SchedulingStrategy},
    },
    runner::CommandRunner,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipelines: Vec<String>,
        instances: usize,
    },
    JobStarted {
        instance: String,
        name: String,
    },
    JobSkipped {
        instance: String,
        reason: String,
    },
    StepStarted {
        instance: String,
        step: String,
        index: usize,
    },
    StepSkipped {
        instance: String,
        step: String,
        reason: String,
    },
    StepFinished {
        instance: String,
        step: String,
        outcome: StepOutcome,
    },
    CacheRestored {
        instance: String,
        key: String,
        matched_key: Option<String>,
        kind: MatchKind,
    },
    CacheSaved {
        instance: String,
        key: String,
        files: usize,
    },
    ArtifactPublished {
        instance: String,
        artifact: String,
        files: usize,
    },
    JobCancelled {
        instance: String,
        reason: String,
    },
    JobFinished {
        instance: String,
        status: JobStatus,
        failure: Option<JobFailure>,
    },
    RunCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of events to every registered handler
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Vec<EventHandler>,
}

impl EventBus {
    pub fn subscribe(&mut self, handler: EventHandler) {
        self.handlers.push(handler);
    }

    pub fn emit(&self, event: ExecutionEvent) {
        for handler in &self.handlers {
            handler(event.clone());
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy: SchedulingStrategy,

    /// Directory steps run in; cache and artifact paths resolve against it
    pub workspace: PathBuf,

    /// Process-wide environment every step starts from
    pub base_env: HashMap<String, String>,

    /// Invocation context, visible as `event.*` / `invocation.*`
    pub invocation: HashMap<String, String>,

    pub step_defaults: StepDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: SchedulingStrategy::default(),
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            base_env: std::env::vars().collect(),
            invocation: HashMap::new(),
            step_defaults: StepDefaults::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_base_env(mut self, env: HashMap<String, String>) -> Self {
        self.base_env = env;
        self
    }

    pub fn with_invocation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.invocation.insert(key.into(), value.into());
        self
    }
}

/// Everything known about a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub state: RunState,
    pub pipelines: Vec<String>,
    /// Every instance, in declaration order
    pub instances: Vec<JobInstance>,
}

impl RunReport {
    /// Logical AND of every instance status
    pub fn is_success(&self) -> bool {
        self.state.status == ExecutionStatus::Succeeded
    }

    /// Process exit code for the run
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Instance by id; ids are unique across the pipelines of a run
    pub fn instance(&self, id: &str) -> Option<&JobInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<JobStatus> {
        self.instance(id).map(|i| i.status)
    }
}

/// Main execution engine
pub struct ExecutionEngine<R> {
    runner: Arc<R>,
    cache: Arc<dyn CacheStore>,
    artifacts: Arc<dyn ArtifactStore>,
    config: EngineConfig,
    events: EventBus,
}

impl<R: CommandRunner + 'static> ExecutionEngine<R> {
    /// An engine with in-memory cache and artifact stores
    pub fn new(runner: R, config: EngineConfig) -> Self {
        Self {
            runner: Arc::new(runner),
            cache: Arc::new(InMemoryCacheStore::new()),
            artifacts: Arc::new(InMemoryArtifactStore::new()),
            config,
            events: EventBus::default(),
        }
    }

    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = store;
        self
    }

    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = store;
        self
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(Arc::new(handler));
        self
    }

    /// Expand and run every pipeline.
    ///
    /// Validation and matrix expansion happen for all pipelines before any
    /// instance runs; a malformed definition aborts the run with an error.
    pub async fn run(&self, pipelines: &[PipelineDefinition]) -> Result<RunReport, PipelineError> {
        let mut state = RunState::new();
        let run_id = state.run_id.to_string();
        let mut groups = Vec::new();
        let mut position = 0;
        let mut taken_ids = HashSet::new();
        for pipeline in pipelines {
            pipeline.validate()?;
            for warning in pipeline.condition_warnings() {
                warn!("{}", warning);
            }

            let instances = pipeline.expand_into(&self.config.invocation, &mut taken_ids)?;
            let mut by_job: HashMap<&str, InstanceGroup> = HashMap::new();
            let mut order = Vec::new();
            for mut instance in instances {
                instance.context.run_id = run_id.clone();
                let Some(job) = pipeline.job(&instance.job_id) else {
                    continue;
                };
                let group = by_job.entry(job.id.as_str()).or_insert_with(|| {
                    order.push(job.id.as_str());
                    InstanceGroup::new(Arc::new(job.clone()))
                });
                group.push(position, instance);
                position += 1;
            }
            for job_id in order {
                if let Some(group) = by_job.remove(job_id) {
                    groups.push(group);
                }
            }
        }

        let names: Vec<String> = pipelines.iter().map(|p| p.name.clone()).collect();
        state.start(position);
        info!(
            "Starting run {} ({} pipelines, {} job instances)",
            state.run_id,
            names.len(),
            position
        );
        self.events.emit(ExecutionEvent::RunStarted {
            run_id: state.run_id,
            pipelines: names.clone(),
            instances: position,
        });

        let executor = Arc::new(JobExecutor::new(
            self.runner.clone(),
            self.cache.clone(),
            ArtifactPublisher::new(self.config.workspace.clone(), self.artifacts.clone(), state.run_id),
            self.config.workspace.clone(),
            self.config.base_env.clone(),
            self.config.step_defaults.clone(),
            self.events.clone(),
        ));
        let scheduler = ExecutionScheduler::new(self.config.strategy);
        let instances = scheduler.run(executor, groups).await;

        state.finish(&instances);
        info!("Run {} finished: {:?}", state.run_id, state.status);
        self.events.emit(ExecutionEvent::RunCompleted {
            run_id: state.run_id,
            status: state.status,
        });

        Ok(RunReport {
            state,
            pipelines: names,
            instances,
        })
    }
}
