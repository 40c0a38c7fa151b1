//! Worker loops that claim jobs, call the collaborator and persist results.
//!
//! Each worker runs as an independent async task and pulls jobs from the
//! shared priority queues. The store's atomic pop is the only coordination
//! point between workers, in this process or any other.
//!
//! Besides running jobs, a worker gates workflow steps on their
//! predecessor's result, writes the liveness heartbeat and periodically
//! sweeps expired entries out of the result and upload indices. A
//! [`WorkerPool`] spawns N workers and stops them through a broadcast
//! channel, letting in-flight jobs finish.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agents::{Agent, AgentRegistry, DEFAULT_AGENT};
use crate::config::{DependencyPolicy, ForgeConfig};
use crate::error::Result;
use crate::health::write_heartbeat;
use crate::index::{score_of, IndexKind, IndexManager};
use crate::llm::Collaborator;
use crate::metrics::MetricsCollector;
use crate::results::ResultStore;
use crate::store::Store;

use super::job::{Executor, Job, JobResult, JobStatus};
use super::queue::JobQueue;

/// Attempts made to persist a result before the job is logged as lost.
const PERSIST_ATTEMPTS: u32 = 3;

/// Base backoff between persist attempts; grows linearly.
const PERSIST_BACKOFF: Duration = Duration::from_millis(200);

/// Pool lifecycle errors.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool already started")]
    AlreadyRunning,

    #[error("Worker pool was never started")]
    NotRunning,

    /// Some worker was still inside a job when the grace period ran out.
    #[error("Workers still busy after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for workers and the pool that runs them.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub num_workers: usize,
    /// Pause after an idle, deferred or failed iteration.
    pub poll_interval: Duration,
    pub dependency_policy: DependencyPolicy,
    /// Age past which a job still waiting on its predecessor is failed.
    pub dependency_timeout: Duration,
    /// Upload retention, used to compute the upload index sweep cutoff.
    pub upload_ttl: Duration,
    /// Minimum spacing between index sweeps.
    pub sweep_interval: Duration,
    /// Grace period for in-flight jobs on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_forge(&ForgeConfig::default())
    }
}

impl WorkerConfig {
    pub fn from_forge(config: &ForgeConfig) -> Self {
        Self {
            num_workers: config.num_workers,
            poll_interval: config.poll_interval,
            dependency_policy: config.dependency_policy,
            dependency_timeout: config.dependency_timeout,
            upload_ttl: config.upload_ttl,
            sweep_interval: config.sweep_interval,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.dependency_policy = policy;
        self
    }

    pub fn with_dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Components a worker needs, shared by every worker of a pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn Store>,
    pub queue: JobQueue,
    pub index: IndexManager,
    pub results: ResultStore,
    pub agents: AgentRegistry,
    pub collaborator: Arc<Collaborator>,
    pub metrics: Arc<MetricsCollector>,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// Every queue was empty.
    Idle,
    /// A job ran to a terminal, persisted result.
    Processed(JobStatus),
    /// A job was put back to wait for its predecessor.
    Deferred,
}

/// Point-in-time counters for one pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub num_workers: usize,
    /// Workers inside a collaborator call right now.
    pub busy_workers: usize,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    /// Times a job went back to the queue to wait for its predecessor.
    pub jobs_deferred: u64,
    /// Mean over terminal jobs; deferrals are not timed.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Jobs that reached a terminal status.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Completed share of terminal jobs, in percent.
    pub fn success_rate(&self) -> f64 {
        match self.total_processed() {
            0 => 0.0,
            total => self.jobs_completed as f64 * 100.0 / total as f64,
        }
    }
}

#[derive(Default)]
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_deferred: AtomicU64,
    total_duration_ms: AtomicU64,
    busy_workers: AtomicU64,
}

impl SharedPoolStats {
    fn record(&self, status: JobStatus, duration: Duration) {
        let counter = match status {
            JobStatus::Completed => &self.jobs_completed,
            JobStatus::Failed => &self.jobs_failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let average_job_duration = match completed + failed {
            0 => Duration::ZERO,
            terminal => Duration::from_millis(total_duration_ms / terminal),
        };

        PoolStats {
            num_workers,
            busy_workers: self.busy_workers.load(Ordering::SeqCst) as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            jobs_deferred: self.jobs_deferred.load(Ordering::SeqCst),
            average_job_duration,
        }
    }
}

/// Pool of workers processing jobs from the shared queues.
pub struct WorkerPool {
    config: WorkerConfig,
    context: WorkerContext,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, context: WorkerContext) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            context,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::default()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Spawns `num_workers` worker tasks named `worker-0..N`.
    ///
    /// # Errors
    ///
    /// `PoolError::AlreadyRunning` on a second call without `shutdown`.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker::with_stats(
                format!("worker-{}", i),
                self.context.clone(),
                self.config.clone(),
                Arc::clone(&self.stats),
            );
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.worker_handles
                .push(tokio::spawn(async move { worker.run(shutdown_rx).await }));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");
        Ok(())
    }

    /// Signals every worker to stop and waits for in-flight jobs to finish.
    ///
    /// # Errors
    ///
    /// `PoolError::ShutdownTimeout` when the grace period elapses first; the
    /// unfinished jobs keep running detached.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!(workers = self.worker_handles.len(), "Stopping worker pool");

        // Workers that already stopped have dropped their receivers.
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = self.worker_handles.drain(..).collect();
        let joined = tokio::time::timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(handles),
        )
        .await;
        self.is_running.store(false, Ordering::SeqCst);

        match joined {
            Ok(outcomes) => {
                for outcome in outcomes {
                    if let Err(e) = outcome {
                        error!(error = %e, "Worker task ended abnormally");
                    }
                }
                info!("Worker pool stopped");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

/// What to do with a claimed job.
enum Plan {
    /// Predecessor has no terminal result yet.
    Defer,
    /// Run the collaborator, optionally with the predecessor's output.
    Run { agent: Agent, context: Option<String> },
    /// Fail without calling the collaborator.
    Reject { agent: Agent, reason: String },
}

/// A single worker loop.
pub struct Worker {
    id: String,
    context: WorkerContext,
    config: WorkerConfig,
    stats: Arc<SharedPoolStats>,
    last_heartbeat: Option<Instant>,
    last_sweep: Option<Instant>,
}

impl Worker {
    pub fn new(id: impl Into<String>, context: WorkerContext, config: WorkerConfig) -> Self {
        Self::with_stats(id, context, config, Arc::new(SharedPoolStats::default()))
    }

    fn with_stats(
        id: impl Into<String>,
        context: WorkerContext,
        config: WorkerConfig,
        stats: Arc<SharedPoolStats>,
    ) -> Self {
        Self {
            id: id.into(),
            context,
            config,
            stats,
            last_heartbeat: None,
            last_sweep: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Main worker loop.
    ///
    /// The shutdown signal is checked between jobs, never during one, so a
    /// claimed job always reaches a persisted result before the worker exits.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = %self.id, "Worker started");
        self.context.metrics.worker_started();

        loop {
            match shutdown_rx.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
            }

            let pause = match self.run_once().await {
                Ok(Iteration::Processed(_)) => None,
                Ok(Iteration::Idle) | Ok(Iteration::Deferred) => Some(self.config.poll_interval),
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Worker iteration failed");
                    Some(self.config.poll_interval)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(worker_id = %self.id, "Worker received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        self.context.metrics.worker_stopped();
        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Runs one claim, execute and persist cycle.
    ///
    /// # Errors
    ///
    /// Store failures. A job claimed before the failure is put back on its
    /// queue unless its result was already being persisted.
    pub async fn run_once(&mut self) -> Result<Iteration> {
        self.maybe_sweep().await;

        let Some(job) = self.context.queue.dequeue().await? else {
            self.heartbeat().await;
            return Ok(Iteration::Idle);
        };

        let plan = match self.plan(&job).await {
            Ok(plan) => plan,
            Err(e) => {
                self.return_to_queue(&job).await;
                return Err(e);
            }
        };

        match plan {
            Plan::Defer => self.defer(job).await,
            Plan::Run { agent, context } => {
                self.stats.busy_workers.fetch_add(1, Ordering::SeqCst);
                let outcome = self.execute(&job, &agent, context.as_deref()).await;
                self.stats.busy_workers.fetch_sub(1, Ordering::SeqCst);
                outcome
            }
            Plan::Reject { agent, reason } => {
                warn!(worker_id = %self.id, job_id = %job.id, reason = %reason, "Job rejected");
                let result = JobResult::failed(&job, &self.executor(&agent), reason, 0);
                self.finish(&agent, result, Duration::ZERO).await
            }
        }
    }

    async fn plan(&self, job: &Job) -> Result<Plan> {
        let context = match (self.config.dependency_policy, job.depends_on) {
            (DependencyPolicy::Strict, Some(predecessor)) => {
                match self.context.results.get(predecessor).await? {
                    None if self.dependency_expired(job) => {
                        let agent = self.resolve_agent(job).await?;
                        return Ok(Plan::Reject {
                            agent,
                            reason: format!(
                                "dependency did not resolve: step {} has no result after {}s ({} deferrals)",
                                predecessor,
                                self.config.dependency_timeout.as_secs(),
                                job.deferrals
                            ),
                        });
                    }
                    None => return Ok(Plan::Defer),
                    Some(upstream) => match upstream.status {
                        JobStatus::Completed => upstream.output,
                        JobStatus::Failed if upstream.optional => None,
                        JobStatus::Failed => {
                            let agent = self.resolve_agent(job).await?;
                            return Ok(Plan::Reject {
                                agent,
                                reason: format!("upstream step {} failed", predecessor),
                            });
                        }
                    },
                }
            }
            _ => None,
        };

        let agent = self.resolve_agent(job).await?;
        Ok(Plan::Run { agent, context })
    }

    /// Whether the job has waited on its predecessor past the deadline.
    fn dependency_expired(&self, job: &Job) -> bool {
        job.age().to_std().unwrap_or_default() >= self.config.dependency_timeout
    }

    async fn resolve_agent(&self, job: &Job) -> Result<Agent> {
        let name = match &job.agent {
            Some(name) => name.clone(),
            None => self.context.agents.auto_assign(&job.task).await?,
        };
        if let Some(agent) = self.context.agents.get(&name).await? {
            return Ok(agent);
        }

        warn!(worker_id = %self.id, agent = %name, "Agent not registered, using default");
        Ok(self
            .context
            .agents
            .get(DEFAULT_AGENT)
            .await?
            .unwrap_or_else(|| Agent::new(DEFAULT_AGENT, "Assistant")))
    }

    async fn defer(&mut self, mut job: Job) -> Result<Iteration> {
        job.deferrals += 1;
        if let Err(e) = self.context.queue.requeue(&job).await {
            error!(worker_id = %self.id, job_id = %job.id, error = %e, "Deferred job lost");
            return Err(e);
        }

        self.context.metrics.record_deferral();
        self.stats.jobs_deferred.fetch_add(1, Ordering::SeqCst);
        debug!(
            worker_id = %self.id,
            job_id = %job.id,
            depends_on = ?job.depends_on,
            deferrals = job.deferrals,
            "Predecessor not finished, job deferred"
        );
        Ok(Iteration::Deferred)
    }

    async fn execute(
        &mut self,
        job: &Job,
        agent: &Agent,
        context: Option<&str>,
    ) -> Result<Iteration> {
        info!(
            worker_id = %self.id,
            job_id = %job.id,
            agent = %agent.name,
            priority = %job.priority,
            "Processing job"
        );

        let task = match context {
            Some(previous) => format!(
                "{}\n\nOutput of the previous step:\n{}",
                job.task, previous
            ),
            None => job.task.clone(),
        };

        let start = Instant::now();
        let outcome = self
            .context
            .collaborator
            .complete(&agent.model, &agent.system_prompt(), &task)
            .await;
        let elapsed = start.elapsed();
        let duration_ms = elapsed.as_millis() as u64;

        let by = self.executor(agent);
        let result = match outcome {
            Ok(output) => JobResult::completed(job, &by, output, duration_ms),
            Err(e) => {
                warn!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    error = %e,
                    "Collaborator call failed"
                );
                JobResult::failed(job, &by, e.to_string(), duration_ms)
            }
        };

        self.finish(agent, result, elapsed).await
    }

    fn executor<'a>(&'a self, agent: &'a Agent) -> Executor<'a> {
        Executor {
            agent: &agent.name,
            role: &agent.role,
            model: Some(&agent.model),
            worker_id: &self.id,
        }
    }

    /// Persists the result, then updates agent stats, metrics and heartbeat.
    async fn finish(
        &mut self,
        agent: &Agent,
        result: JobResult,
        elapsed: Duration,
    ) -> Result<Iteration> {
        self.persist(&result).await?;

        if let Err(e) = self
            .context
            .agents
            .record_completion(&agent.name, result.completed_at)
            .await
        {
            warn!(agent = %agent.name, error = %e, "Failed to update agent stats");
        }
        self.context
            .metrics
            .record_job(result.status.as_str(), elapsed.as_secs_f64());
        self.stats.record(result.status, elapsed);
        self.heartbeat().await;

        match result.status {
            JobStatus::Completed => info!(
                worker_id = %self.id,
                job_id = %result.job_id,
                duration_ms = result.duration_ms,
                "Job completed successfully"
            ),
            JobStatus::Failed => warn!(
                worker_id = %self.id,
                job_id = %result.job_id,
                error = ?result.error,
                "Job completed with failure status"
            ),
        }
        Ok(Iteration::Processed(result.status))
    }

    async fn persist(&self, result: &JobResult) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.context.results.save(result).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < PERSIST_ATTEMPTS && e.is_retryable() => {
                    warn!(
                        worker_id = %self.id,
                        job_id = %result.job_id,
                        attempt,
                        error = %e,
                        "Failed to persist result, retrying"
                    );
                    tokio::time::sleep(PERSIST_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        worker_id = %self.id,
                        job_id = %result.job_id,
                        error = %e,
                        "Result could not be persisted, job lost"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn return_to_queue(&self, job: &Job) {
        if let Err(e) = self.context.queue.requeue(job).await {
            error!(worker_id = %self.id, job_id = %job.id, error = %e, "Claimed job lost");
        }
    }

    /// Writes the heartbeat, at most once per poll interval.
    async fn heartbeat(&mut self) {
        if self
            .last_heartbeat
            .is_some_and(|at| at.elapsed() < self.config.poll_interval)
        {
            return;
        }
        match write_heartbeat(self.context.store.as_ref(), Utc::now()).await {
            Ok(()) => self.last_heartbeat = Some(Instant::now()),
            Err(e) => warn!(worker_id = %self.id, error = %e, "Failed to write heartbeat"),
        }
    }

    /// Drops index entries whose records have certainly expired.
    async fn maybe_sweep(&mut self) {
        if self
            .last_sweep
            .is_some_and(|at| at.elapsed() < self.config.sweep_interval)
        {
            return;
        }
        self.last_sweep = Some(Instant::now());

        let now = score_of(Utc::now());
        let retention = [
            (IndexKind::Results, self.context.results.ttl()),
            (IndexKind::Uploads, self.config.upload_ttl),
        ];
        for (kind, ttl) in retention {
            let cutoff = now - 2.0 * ttl.as_secs_f64();
            if let Err(e) = self.context.index.sweep(kind, cutoff).await {
                warn!(index = %kind, error = %e, "Index sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::collaborator::tests::MockLlmProvider;
    use crate::scheduler::Priority;
    use crate::store::{keys, MemoryStore};

    struct Harness {
        store: Arc<MemoryStore>,
        context: WorkerContext,
    }

    fn harness(provider: MockLlmProvider, timeout: Duration) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let index = IndexManager::new(store.clone(), metrics.clone());
        let context = WorkerContext {
            store: store.clone(),
            queue: JobQueue::new(store.clone(), metrics.clone()),
            index: index.clone(),
            results: ResultStore::new(store.clone(), index.clone(), Duration::from_secs(3600)),
            agents: AgentRegistry::new(store.clone(), index),
            collaborator: Arc::new(Collaborator::new(
                Arc::new(provider),
                metrics.clone(),
                timeout,
            )),
            metrics,
        };
        Harness { store, context }
    }

    fn config() -> WorkerConfig {
        WorkerConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_dependency_timeout(Duration::from_secs(60))
    }

    fn ok_harness() -> Harness {
        harness(MockLlmProvider::new("done"), Duration::from_secs(1))
    }

    async fn seed_result(context: &WorkerContext, job: &Job, status: JobStatus) {
        let by = Executor {
            agent: "general_assistant",
            role: "Assistant",
            model: None,
            worker_id: "seed",
        };
        let result = match status {
            JobStatus::Completed => JobResult::completed(job, &by, "upstream output", 5),
            JobStatus::Failed => JobResult::failed(job, &by, "boom", 5),
        };
        context.results.save(&result).await.unwrap();
    }

    #[test]
    fn test_worker_config_from_forge() {
        let forge = ForgeConfig::default();
        let config = WorkerConfig::from_forge(&forge);
        assert_eq!(config.num_workers, forge.num_workers);
        assert_eq!(config.poll_interval, forge.poll_interval);
        assert_eq!(config.dependency_policy, DependencyPolicy::Strict);
    }

    #[test]
    fn test_pool_stats_success_rate() {
        let stats = PoolStats {
            jobs_completed: 3,
            jobs_failed: 1,
            ..Default::default()
        };
        assert_eq!(stats.total_processed(), 4);
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(PoolStats::default().success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_idle_iteration_writes_heartbeat() {
        let h = ok_harness();
        let mut worker = Worker::new("worker-0", h.context.clone(), config());
        assert_eq!(worker.run_once().await.unwrap(), Iteration::Idle);
        assert!(h.store.get(keys::WORKER_HEARTBEAT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_processes_job_and_persists_result() {
        let h = ok_harness();
        h.context.agents.ensure_defaults().await.unwrap();
        let job = Job::new("Fix the login bug");
        h.context.queue.enqueue(&job).await.unwrap();

        let mut worker = Worker::new("worker-0", h.context.clone(), config());
        assert_eq!(
            worker.run_once().await.unwrap(),
            Iteration::Processed(JobStatus::Completed)
        );

        let result = h.context.results.get(job.id).await.unwrap().unwrap();
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.output.as_deref(), Some("done"));
        assert_eq!(result.agent, "debugger_bot");
        assert_eq!(result.worker_id, "worker-0");
        assert_eq!(h.context.results.count().await.unwrap(), 1);

        let agent = h.context.agents.get("debugger_bot").await.unwrap().unwrap();
        assert_eq!(agent.task_count, 1);
        assert_eq!(h.context.metrics.jobs_with_status("completed"), 1);
    }

    #[tokio::test]
    async fn test_collaborator_timeout_fails_job_and_loop_continues() {
        let h = harness(
            MockLlmProvider::slow("late", Duration::from_secs(5)),
            Duration::from_millis(20),
        );
        let job = Job::new("Summarize the report").with_agent("general_assistant");
        h.context.queue.enqueue(&job).await.unwrap();

        let mut worker = Worker::new("worker-0", h.context.clone(), config());
        assert_eq!(
            worker.run_once().await.unwrap(),
            Iteration::Processed(JobStatus::Failed)
        );
        let result = h.context.results.get(job.id).await.unwrap().unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert!(!result.error.unwrap_or_default().is_empty());

        assert_eq!(worker.run_once().await.unwrap(), Iteration::Idle);
    }

    #[tokio::test]
    async fn test_strict_gate_defers_until_predecessor_finishes() {
        let h = ok_harness();
        let first = Job::new("plan");
        let second = Job::new("execute").with_depends_on(first.id);
        h.context.queue.enqueue(&second).await.unwrap();

        let mut worker = Worker::new("worker-0", h.context.clone(), config());
        assert_eq!(worker.run_once().await.unwrap(), Iteration::Deferred);
        assert_eq!(h.context.metrics.deferrals(), 1);

        seed_result(&h.context, &first, JobStatus::Completed).await;
        assert_eq!(
            worker.run_once().await.unwrap(),
            Iteration::Processed(JobStatus::Completed)
        );
        assert!(h.context.results.get(second.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_required_upstream_failure_fails_dependent() {
        let h = ok_harness();
        let first = Job::new("plan");
        seed_result(&h.context, &first, JobStatus::Failed).await;
        let second = Job::new("execute").with_depends_on(first.id);
        h.context.queue.enqueue(&second).await.unwrap();

        let mut worker = Worker::new("worker-0", h.context.clone(), config());
        assert_eq!(
            worker.run_once().await.unwrap(),
            Iteration::Processed(JobStatus::Failed)
        );
        let result = h.context.results.get(second.id).await.unwrap().unwrap();
        assert!(result.error.unwrap().contains("upstream step"));
    }

    #[tokio::test]
    async fn test_optional_upstream_failure_does_not_block() {
        let h = ok_harness();
        let qa = Job::new("review").optional();
        seed_result(&h.context, &qa, JobStatus::Failed).await;
        let feedback = Job::new("summarize").with_depends_on(qa.id);
        h.context.queue.enqueue(&feedback).await.unwrap();

        let mut worker = Worker::new("worker-0", h.context.clone(), config());
        assert_eq!(
            worker.run_once().await.unwrap(),
            Iteration::Processed(JobStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_dependency_deadline_fails_job() {
        let h = ok_harness();
        let mut job = Job::new("orphaned step").with_depends_on(uuid::Uuid::new_v4());
        job.created_at = Utc::now() - chrono::Duration::seconds(61);
        h.context.queue.enqueue(&job).await.unwrap();

        let mut worker = Worker::new("worker-0", h.context.clone(), config());
        assert_eq!(
            worker.run_once().await.unwrap(),
            Iteration::Processed(JobStatus::Failed)
        );
        let result = h.context.results.get(job.id).await.unwrap().unwrap();
        assert!(result.error.unwrap().contains("did not resolve"));
    }

    #[tokio::test]
    async fn test_many_deferrals_within_deadline_keep_waiting() {
        let h = ok_harness();
        let mut job = Job::new("patient step").with_depends_on(uuid::Uuid::new_v4());
        job.deferrals = 10_000;
        h.context.queue.enqueue(&job).await.unwrap();

        let mut worker = Worker::new("worker-0", h.context.clone(), config());
        assert_eq!(worker.run_once().await.unwrap(), Iteration::Deferred);
        assert!(h.context.results.get(job.id).await.unwrap().is_none());
        assert_eq!(h.context.queue.depth().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn test_advisory_policy_ignores_dependencies() {
        let h = ok_harness();
        let job = Job::new("execute").with_depends_on(uuid::Uuid::new_v4());
        h.context.queue.enqueue(&job).await.unwrap();

        let mut worker = Worker::new(
            "worker-0",
            h.context.clone(),
            config().with_dependency_policy(DependencyPolicy::Advisory),
        );
        assert_eq!(
            worker.run_once().await.unwrap(),
            Iteration::Processed(JobStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_error() {
        let h = ok_harness();
        h.store.set_unavailable(true);
        let mut worker = Worker::new("worker-0", h.context.clone(), config());
        assert!(worker.run_once().await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_pool_processes_and_shuts_down() {
        let h = ok_harness();
        for i in 0..4 {
            let job = Job::new(format!("job {}", i)).with_priority(Priority::High);
            h.context.queue.enqueue(&job).await.unwrap();
        }

        let mut pool = WorkerPool::new(config().with_num_workers(2), h.context.clone());
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(PoolError::AlreadyRunning)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.stats().total_processed() < 4 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.shutdown().await.unwrap();
        assert!(!pool.is_running());
        assert_eq!(pool.stats().jobs_completed, 4);
        assert_eq!(h.context.results.count().await.unwrap(), 4);
        assert_eq!(h.context.metrics.active_workers(), 0);
        assert!(matches!(pool.shutdown().await, Err(PoolError::NotRunning)));
    }
}
