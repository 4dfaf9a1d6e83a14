//! Execution scheduler - dispatches job instances under concurrency bounds

use crate::{
    core::{pipeline::Job, state::{JobInstance, JobStatus}},
    execution::executor::JobExecutor,
    runner::CommandRunner,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Strategy for scheduling job instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One instance at a time, in declaration order
    #[default]
    Sequential,

    /// Every instance at once (per-group limits still apply)
    Parallel,

    /// Limited parallelism (max N concurrent instances)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Global concurrency bound for `total` instances
    pub fn concurrency(&self, total: usize) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => total.max(1),
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// The sibling instances of one job: they share fail-fast and `max_parallel`
pub struct InstanceGroup {
    pub job: Arc<Job>,
    /// `(position in the run, instance)` in declaration order
    pub instances: Vec<(usize, JobInstance)>,
    cancel: Arc<AtomicBool>,
}

impl InstanceGroup {
    pub fn new(job: Arc<Job>) -> Self {
        Self {
            job,
            instances: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push(&mut self, position: usize, instance: JobInstance) {
        self.instances.push((position, instance));
    }

    /// Record a finished instance; trips the group cancel flag under fail-fast
    fn observe(job: &Job, cancel: &AtomicBool, instance: &JobInstance) {
        if instance.status == JobStatus::Failed && job.fail_fast && !cancel.swap(true, Ordering::SeqCst) {
            warn!(
                "Fail-fast: {} failed, cancelling remaining instances of job '{}'",
                instance.id, job.id
            );
        }
    }
}

/// Scheduler for dispatching job instances
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Run every group to completion; results are ordered by run position
    pub async fn run<R>(&self, executor: Arc<JobExecutor<R>>, groups: Vec<InstanceGroup>) -> Vec<JobInstance>
    where
        R: CommandRunner + 'static,
    {
        let total: usize = groups.iter().map(|g| g.instances.len()).sum();
        let mut results: Vec<(usize, JobInstance)> = match self.strategy {
            SchedulingStrategy::Sequential => self.run_sequential(&executor, groups).await,
            _ => self.run_concurrent(executor, groups, self.strategy.concurrency(total)).await,
        };
        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, instance)| instance).collect()
    }

    async fn run_sequential<R: CommandRunner>(
        &self,
        executor: &JobExecutor<R>,
        groups: Vec<InstanceGroup>,
    ) -> Vec<(usize, JobInstance)> {
        let mut results = Vec::new();
        for group in groups {
            for (position, instance) in group.instances {
                let finished = executor.execute(&group.job, instance, &group.cancel).await;
                InstanceGroup::observe(&group.job, &group.cancel, &finished);
                results.push((position, finished));
            }
        }
        results
    }

    /// Groups are dispatched independently; within a group instances are
    /// admitted in declaration order, first by the group's `max_parallel`
    /// then by the global bound.
    async fn run_concurrent<R: CommandRunner + 'static>(
        &self,
        executor: Arc<JobExecutor<R>>,
        groups: Vec<InstanceGroup>,
        concurrency: usize,
    ) -> Vec<(usize, JobInstance)> {
        info!("Dispatching instances with concurrency {}", concurrency);
        let global = Arc::new(Semaphore::new(concurrency));
        let mut dispatchers = JoinSet::new();

        for group in groups {
            let executor = executor.clone();
            let global = global.clone();
            dispatchers.spawn(async move { dispatch_group(executor, group, global).await });
        }

        let mut results = Vec::new();
        while let Some(joined) = dispatchers.join_next().await {
            match joined {
                Ok(group_results) => results.extend(group_results),
                Err(e) => error!("Group dispatcher panicked: {}", e),
            }
        }
        results
    }
}

async fn dispatch_group<R: CommandRunner + 'static>(
    executor: Arc<JobExecutor<R>>,
    group: InstanceGroup,
    global: Arc<Semaphore>,
) -> Vec<(usize, JobInstance)> {
    let limit = group.job.max_parallel.map(|n| Arc::new(Semaphore::new(n.max(1))));
    let mut running = JoinSet::new();
    let mut results = Vec::new();

    for (position, instance) in group.instances {
        let group_permit = match &limit {
            Some(limit) => limit.clone().acquire_owned().await.ok(),
            None => None,
        };
        let global_permit = global.clone().acquire_owned().await.ok();

        if group.cancel.load(Ordering::SeqCst) {
            results.push((position, executor.cancel_pending(instance)));
            continue;
        }

        let executor = executor.clone();
        let job = group.job.clone();
        let cancel = group.cancel.clone();
        running.spawn(async move {
            let _permits = (group_permit, global_permit);
            let finished = executor.execute(&job, instance, &cancel).await;
            InstanceGroup::observe(&job, &cancel, &finished);
            (position, finished)
        });
    }

    while let Some(joined) = running.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => error!("Job instance task of '{}' panicked: {}", group.job.id, e),
        }
    }
    results
}
