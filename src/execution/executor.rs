//! Job executor - runs the steps of one job instance

use crate::{
    artifact::ArtifactPublisher,
    cache::{CacheKeyResolver, CacheOutcome, CacheSpec, CacheStore, ResolvedKeys, SavePolicy},
    core::{
        condition::Condition,
        context::InstanceContext,
        error::{JobFailure, StepFailure},
        pipeline::Job,
        state::{JobInstance, StepOutcome, StepRecord},
        step::{Step, StepAction, StepDefaults},
    },
    execution::engine::{EventBus, ExecutionEvent},
    runner::{CommandRequest, CommandRunner, RunnerError},
    workspace,
};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, info, warn};

/// Which limit bounds a step's run time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Limit {
    Step(Duration),
    /// What is left of the job budget
    Job(Duration),
}

/// Result of running a single step body
enum StepResult {
    Succeeded {
        exit_code: i32,
        stdout: String,
        stderr: String,
        cache: Option<CacheOutcome>,
    },
    Failed {
        failure: StepFailure,
        stdout: String,
        stderr: String,
    },
    /// Fatal regardless of `continue_on_error`
    Fatal(JobFailure),
}

/// Executes job instances against a command runner and the shared stores
pub struct JobExecutor<R> {
    runner: Arc<R>,
    cache: Arc<dyn CacheStore>,
    resolver: CacheKeyResolver,
    publisher: ArtifactPublisher,
    workspace: PathBuf,
    base_env: HashMap<String, String>,
    defaults: StepDefaults,
    events: EventBus,
}

impl<R: CommandRunner> JobExecutor<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: Arc<R>,
        cache: Arc<dyn CacheStore>,
        publisher: ArtifactPublisher,
        workspace: PathBuf,
        base_env: HashMap<String, String>,
        defaults: StepDefaults,
        events: EventBus,
    ) -> Self {
        Self {
            runner,
            cache,
            resolver: CacheKeyResolver::new(workspace.clone()),
            publisher,
            workspace,
            base_env,
            defaults,
            events,
        }
    }

    /// Run one instance to a terminal status.
    ///
    /// `cancel` is checked before every step; an in-flight step always
    /// finishes before the instance stops as `cancelled`.
    pub async fn execute(&self, job: &Job, mut instance: JobInstance, cancel: &AtomicBool) -> JobInstance {
        if cancel.load(Ordering::SeqCst) {
            return self.cancel_pending(instance);
        }

        if let Some(condition) = &job.condition {
            if !self.condition_holds(condition, &instance.context, &instance.id) {
                let reason = format!("condition '{}' is false", condition.source());
                info!("Skipping job instance {}: {}", instance.id, reason);
                instance.skip(reason.clone());
                self.events.emit(ExecutionEvent::JobSkipped {
                    instance: instance.id.clone(),
                    reason,
                });
                return instance;
            }
        }

        instance.start();
        info!("Starting job instance: {}", instance.name);
        self.events.emit(ExecutionEvent::JobStarted {
            instance: instance.id.clone(),
            name: instance.name.clone(),
        });

        // budgets past what `Instant` can represent never expire
        let deadline = job.timeout.and_then(|t| Instant::now().checked_add(t));
        let job_budget_secs = job.timeout.map(|t| t.as_secs()).unwrap_or_default();

        // step-visible context; exported env lands in `env`
        let mut context = instance.context.clone();
        let mut env = self.base_env.clone();
        env.extend(context.env.clone());
        env.extend(context.instance_env());

        let mut pending_saves: Vec<(CacheSpec, ResolvedKeys)> = Vec::new();
        let mut failure: Option<JobFailure> = None;
        let mut cancelled = false;

        for (index, step) in job.steps.iter().enumerate() {
            if failure.is_some() || cancelled {
                let reason = if cancelled { "job cancelled" } else { "a previous step failed" };
                instance.steps.push(StepRecord::skipped(index, &step.name, reason));
                continue;
            }
            if cancel.load(Ordering::SeqCst) {
                info!("Job instance {} cancelled before step '{}'", instance.id, step.name);
                cancelled = true;
                instance.steps.push(StepRecord::skipped(index, &step.name, "job cancelled"));
                continue;
            }

            if let Some(condition) = &step.condition {
                if !self.condition_holds(condition, &context, &instance.id) {
                    let reason = format!("condition '{}' is false", condition.source());
                    debug!("Skipping step '{}' of {}: {}", step.name, instance.id, reason);
                    self.events.emit(ExecutionEvent::StepSkipped {
                        instance: instance.id.clone(),
                        step: step.name.clone(),
                        reason: reason.clone(),
                    });
                    instance.steps.push(StepRecord::skipped(index, &step.name, reason));
                    continue;
                }
            }

            self.events.emit(ExecutionEvent::StepStarted {
                instance: instance.id.clone(),
                step: step.name.clone(),
                index,
            });
            let started_at = Utc::now();

            let result = match self.step_limit(step, deadline) {
                Err(()) => StepResult::Fatal(JobFailure::Timeout(job_budget_secs)),
                Ok(limit) => match &step.action {
                    StepAction::Run { command, shell } => {
                        self.run_command(step, command, shell.as_deref(), limit, &mut env, &mut context, job_budget_secs)
                            .await
                    }
                    StepAction::Cache(spec) => {
                        let (result, save) = self.restore_cache(spec, &context, &instance.id).await;
                        if let Some(keys) = save {
                            pending_saves.push((spec.clone(), keys));
                        }
                        result
                    }
                },
            };

            let (outcome, stdout, stderr, cache) = match result {
                StepResult::Succeeded {
                    exit_code,
                    stdout,
                    stderr,
                    cache,
                } => (StepOutcome::Succeeded { exit_code }, stdout, stderr, cache),
                StepResult::Failed {
                    failure: step_failure,
                    stdout,
                    stderr,
                } => {
                    if step.continue_on_error {
                        warn!(
                            "Step '{}' of {} failed ({}), continuing",
                            step.name, instance.id, step_failure
                        );
                    } else {
                        warn!("Step '{}' of {} failed: {}", step.name, instance.id, step_failure);
                        failure = Some(JobFailure::StepFailed {
                            step: step.name.clone(),
                            reason: step_failure.clone(),
                        });
                    }
                    let outcome = StepOutcome::Failed {
                        failure: step_failure,
                        continued: step.continue_on_error,
                    };
                    (outcome, stdout, stderr, None)
                }
                StepResult::Fatal(job_failure) => {
                    warn!("Step '{}' of {}: {}", step.name, instance.id, job_failure);
                    let step_failure = match &job_failure {
                        JobFailure::ToolMissing { tool, .. } => StepFailure::ToolMissing(tool.clone()),
                        _ => StepFailure::Timeout(job_budget_secs),
                    };
                    failure = Some(job_failure);
                    let outcome = StepOutcome::Failed {
                        failure: step_failure,
                        continued: false,
                    };
                    (outcome, String::new(), String::new(), None)
                }
            };

            self.events.emit(ExecutionEvent::StepFinished {
                instance: instance.id.clone(),
                step: step.name.clone(),
                outcome: outcome.clone(),
            });
            instance.steps.push(StepRecord {
                index,
                name: step.name.clone(),
                outcome,
                stdout,
                stderr,
                cache,
                started_at: Some(started_at),
                finished_at: Some(Utc::now()),
            });
        }

        if cancelled {
            instance.cancel();
            self.events.emit(ExecutionEvent::JobCancelled {
                instance: instance.id.clone(),
                reason: "a sibling instance failed".to_string(),
            });
            return instance;
        }

        let body_succeeded = failure.is_none();
        self.save_caches(&mut instance, pending_saves, body_succeeded).await;

        for spec in &job.artifacts {
            if !ArtifactPublisher::applies(spec, body_succeeded) {
                continue;
            }
            match self.publisher.publish(spec, &context).await {
                Ok(Some(artifact)) => {
                    self.events.emit(ExecutionEvent::ArtifactPublished {
                        instance: instance.id.clone(),
                        artifact: artifact.name.clone(),
                        files: artifact.files.len(),
                    });
                    instance.artifacts.push(artifact);
                }
                Ok(None) => {}
                Err(artifact_failure) => {
                    if failure.is_none() {
                        warn!("Job instance {} demoted to failed: {}", instance.id, artifact_failure);
                        failure = Some(artifact_failure);
                    } else {
                        warn!("Job instance {}: {}", instance.id, artifact_failure);
                    }
                }
            }
        }

        match failure {
            None => instance.succeed(),
            Some(f) => instance.fail(f),
        }
        info!("Job instance {} finished: {:?}", instance.id, instance.status);
        self.events.emit(ExecutionEvent::JobFinished {
            instance: instance.id.clone(),
            status: instance.status,
            failure: instance.failure.clone(),
        });
        instance
    }

    /// Mark an instance that never started as cancelled
    pub fn cancel_pending(&self, mut instance: JobInstance) -> JobInstance {
        info!("Cancelling pending job instance {}", instance.id);
        instance.cancel();
        self.events.emit(ExecutionEvent::JobCancelled {
            instance: instance.id.clone(),
            reason: "a sibling instance failed".to_string(),
        });
        instance
    }

    /// Evaluation errors count as false
    fn condition_holds(&self, condition: &Condition, context: &InstanceContext, instance: &str) -> bool {
        match condition.evaluate(context) {
            Ok(value) => value,
            Err(e) => {
                warn!("{}: condition '{}' could not be evaluated: {}", instance, condition.source(), e);
                false
            }
        }
    }

    /// `Err` when the job budget is already spent
    fn step_limit(&self, step: &Step, deadline: Option<Instant>) -> Result<Option<Limit>, ()> {
        let step_timeout = step.timeout.or(self.defaults.timeout);
        let remaining = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(());
                }
                Some(left)
            }
            None => None,
        };

        Ok(match (step_timeout, remaining) {
            (Some(own), Some(left)) if own <= left => Some(Limit::Step(own)),
            (_, Some(left)) => Some(Limit::Job(left)),
            (Some(own), None) => Some(Limit::Step(own)),
            (None, None) => None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_command(
        &self,
        step: &Step,
        command: &str,
        shell: Option<&str>,
        limit: Option<Limit>,
        env: &mut HashMap<String, String>,
        context: &mut InstanceContext,
        job_budget_secs: u64,
    ) -> StepResult {
        for tool in &step.requires {
            if !self.runner.tool_available(tool) {
                return StepResult::Fatal(JobFailure::ToolMissing {
                    step: step.name.clone(),
                    tool: tool.clone(),
                });
            }
        }

        let mut step_env = env.clone();
        step_env.extend(step.env.clone());
        let working_dir = match &step.working_directory {
            Some(dir) => self.workspace.join(dir),
            None => self.workspace.clone(),
        };
        let request = CommandRequest {
            step: step.name.clone(),
            command: command.to_string(),
            shell: shell.map(str::to_string),
            env: step_env,
            working_dir,
        };

        info!("Executing step: {}", step.name);
        let output = match limit {
            None => self.runner.run(&request).await,
            Some(Limit::Step(duration)) | Some(Limit::Job(duration)) => {
                match timeout(duration, self.runner.run(&request)).await {
                    Ok(output) => output,
                    Err(_) => {
                        return match limit {
                            Some(Limit::Job(_)) => StepResult::Fatal(JobFailure::Timeout(job_budget_secs)),
                            _ => StepResult::Failed {
                                failure: StepFailure::Timeout(duration.as_secs()),
                                stdout: String::new(),
                                stderr: String::new(),
                            },
                        };
                    }
                }
            }
        };

        match output {
            Ok(output) => {
                // exports are scoped to the remaining steps of this instance
                for (key, value) in &output.exported_env {
                    env.insert(key.clone(), value.clone());
                    context.env.insert(key.clone(), value.clone());
                }
                if output.success() {
                    StepResult::Succeeded {
                        exit_code: output.exit_code,
                        stdout: output.stdout,
                        stderr: output.stderr,
                        cache: None,
                    }
                } else {
                    StepResult::Failed {
                        failure: StepFailure::ExitCode(output.exit_code),
                        stdout: output.stdout,
                        stderr: output.stderr,
                    }
                }
            }
            Err(RunnerError::ToolMissing(tool)) => StepResult::Fatal(JobFailure::ToolMissing {
                step: step.name.clone(),
                tool,
            }),
            Err(e) => StepResult::Failed {
                failure: StepFailure::Spawn(e.to_string()),
                stdout: String::new(),
                stderr: String::new(),
            },
        }
    }

    /// Restore a cache; returns the keys to save later when the hit was not exact.
    ///
    /// Cache problems never fail the job: they degrade to a miss.
    async fn restore_cache(
        &self,
        spec: &CacheSpec,
        context: &InstanceContext,
        instance: &str,
    ) -> (StepResult, Option<ResolvedKeys>) {
        let keys = match self.resolver.resolve(spec, context) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("{}: could not resolve cache key, skipping cache: {}", instance, e);
                return (
                    StepResult::Succeeded {
                        exit_code: 0,
                        stdout: String::new(),
                        stderr: String::new(),
                        cache: None,
                    },
                    None,
                );
            }
        };

        let restored = match self.cache.restore(&self.workspace, &keys.primary, &keys.restore_keys).await {
            Ok(restored) => restored,
            Err(e) => {
                warn!("{}: cache restore failed, treating as miss: {}", instance, e);
                crate::cache::RestoreResult::miss()
            }
        };
        info!(
            "{}: cache {:?} for key {} (matched {:?})",
            instance, restored.kind, keys.primary, restored.matched_key
        );
        self.events.emit(ExecutionEvent::CacheRestored {
            instance: instance.to_string(),
            key: keys.primary.clone(),
            matched_key: restored.matched_key.clone(),
            kind: restored.kind,
        });

        let outcome = CacheOutcome {
            primary_key: keys.primary.clone(),
            restore_keys: keys.restore_keys.clone(),
            matched_key: restored.matched_key,
            kind: restored.kind,
            restored_files: restored.paths.len(),
        };
        let save = restored.kind.needs_save().then_some(keys);
        (
            StepResult::Succeeded {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                cache: Some(outcome),
            },
            save,
        )
    }

    async fn save_caches(
        &self,
        instance: &mut JobInstance,
        pending: Vec<(CacheSpec, ResolvedKeys)>,
        body_succeeded: bool,
    ) {
        for (spec, keys) in pending {
            if !body_succeeded && spec.save != SavePolicy::Always {
                debug!("{}: not saving cache {} after failure", instance.id, keys.primary);
                continue;
            }
            let files = workspace::resolve_globs(&self.workspace, &spec.paths);
            if files.is_empty() {
                warn!("{}: cache paths {:?} matched no files, nothing saved", instance.id, spec.paths);
                continue;
            }
            match self.cache.save(&keys.primary, &self.workspace, &files).await {
                Ok(()) => {
                    info!("{}: saved cache {} ({} files)", instance.id, keys.primary, files.len());
                    self.events.emit(ExecutionEvent::CacheSaved {
                        instance: instance.id.clone(),
                        key: keys.primary.clone(),
                        files: files.len(),
                    });
                    instance.saved_cache_keys.push(keys.primary);
                }
                Err(e) => warn!("{}: cache save for {} failed: {}", instance.id, keys.primary, e),
            }
        }
    }
}
