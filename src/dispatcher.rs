//! Caller-facing entry point.
//!
//! [`Dispatcher`] constructs one store handle, one collaborator and one
//! metrics collector at startup and hands them to every component. Routing
//! layers and the CLI talk only to the dispatcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::agents::{normalize_name, Agent, AgentRegistry};
use crate::analytics::{AnalyticsAggregator, AnalyticsSummary, TrendPoint};
use crate::config::ForgeConfig;
use crate::error::Result;
use crate::health::{HealthMonitor, HealthSnapshot};
use crate::index::IndexManager;
use crate::llm::{ChatClient, Collaborator, LlmProvider};
use crate::metrics::MetricsCollector;
use crate::reports::{self, ReportFile};
use crate::results::{
    agent_performance, export_json, export_text, write_export, AgentPerformance, ExportFormat,
    ResultStore,
};
use crate::scheduler::{
    Job, JobQueue, JobResult, Priority, QueueDepth, Worker, WorkerConfig, WorkerContext,
    WorkerPool,
};
use crate::store::{RedisStore, Store};
use crate::uploads::{NewUpload, UploadRecord, UploadRegistry};
use crate::workflow::{WorkflowOptions, WorkflowOrchestrator, WorkflowReport};

/// Agents scanned when aggregating performance.
const AGENT_SCAN_LIMIT: u64 = 200;

/// A single job submission.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub task: String,
    pub priority: Priority,
    /// Target agent; auto-assigned by the worker when absent.
    pub agent: Option<String>,
}

impl JobRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            priority: Priority::Normal,
            agent: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

pub struct Dispatcher {
    config: ForgeConfig,
    store: Arc<dyn Store>,
    metrics: Arc<MetricsCollector>,
    collaborator: Arc<Collaborator>,
    queue: JobQueue,
    index: IndexManager,
    results: ResultStore,
    agents: AgentRegistry,
    uploads: UploadRegistry,
    workflows: WorkflowOrchestrator,
    health: HealthMonitor,
    analytics: AnalyticsAggregator,
}

impl Dispatcher {
    /// Connects to Redis and the configured chat API.
    ///
    /// # Errors
    ///
    /// - `ForgeError::Config` if the configuration is invalid
    /// - `ForgeError::Store` if Redis cannot be reached
    /// - `ForgeError::Collaborator` if the HTTP client cannot be built
    pub async fn connect(config: ForgeConfig) -> Result<Self> {
        config.validate()?;
        let store = RedisStore::connect(&config.redis_url, config.store_timeout).await?;
        let provider = ChatClient::from_config(&config)?;
        info!(redis_url = %config.redis_url, "Connected to store");
        Self::with_store(config, Arc::new(store), Arc::new(provider))
    }

    /// Wires every component around an existing store and provider.
    pub fn with_store(
        config: ForgeConfig,
        store: Arc<dyn Store>,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new()?);
        let collaborator = Arc::new(Collaborator::from_config(
            provider,
            metrics.clone(),
            &config,
        ));

        let index = IndexManager::new(store.clone(), metrics.clone());
        let queue = JobQueue::new(store.clone(), metrics.clone());
        let results = ResultStore::new(store.clone(), index.clone(), config.result_ttl);
        let agents = AgentRegistry::new(store.clone(), index.clone());
        let uploads = UploadRegistry::new(
            store.clone(),
            index.clone(),
            queue.clone(),
            config.upload_ttl,
        );
        let workflows = WorkflowOrchestrator::new(
            store.clone(),
            queue.clone(),
            index.clone(),
            results.clone(),
            agents.clone(),
        );
        let health = HealthMonitor::new(
            store.clone(),
            queue.clone(),
            index.clone(),
            metrics.clone(),
            config.health_ttl,
            config.heartbeat_stale_after,
        );
        let analytics = AnalyticsAggregator::new(index.clone(), metrics.clone(), config.analytics_ttl);

        Ok(Self {
            config,
            store,
            metrics,
            collaborator,
            queue,
            index,
            results,
            agents,
            uploads,
            workflows,
            health,
            analytics,
        })
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    // ---- jobs and workflows ----

    /// Queues a single job and returns its id.
    pub async fn enqueue_job(&self, request: JobRequest) -> Result<Uuid> {
        JobQueue::validate_task(&request.task)?;
        let mut job = Job::new(request.task.trim()).with_priority(request.priority);
        if let Some(agent) = request.agent.filter(|a| !a.trim().is_empty()) {
            job = job.with_agent(normalize_name(&agent));
        }
        let job_id = self.queue.enqueue(&job).await?;
        info!(job_id = %job_id, priority = %job.priority, "Job queued");
        Ok(job_id)
    }

    pub async fn queue_depth(&self) -> Result<QueueDepth> {
        self.queue.depth().await
    }

    /// Enqueues the workflow's steps; the returned report has every step queued.
    pub async fn create_workflow(
        &self,
        task: &str,
        options: WorkflowOptions,
    ) -> Result<WorkflowReport> {
        self.workflows.create_workflow(task, options).await
    }

    pub async fn get_workflow_status(&self, workflow_id: Uuid) -> Result<Option<WorkflowReport>> {
        self.workflows.get_workflow_status(workflow_id).await
    }

    pub async fn list_workflows(&self, offset: u64, limit: u64) -> Result<Vec<WorkflowReport>> {
        self.workflows.list_workflows(offset, limit).await
    }

    pub async fn admin_review(&self, job_id: Uuid, prompt: &str) -> Result<Uuid> {
        self.workflows.admin_review(job_id, prompt).await
    }

    // ---- results ----

    pub async fn list_results(&self, offset: u64, limit: u64) -> Result<Vec<JobResult>> {
        self.results.list(offset, limit).await
    }

    pub async fn get_result(&self, job_id: Uuid) -> Result<Option<JobResult>> {
        self.results.get(job_id).await
    }

    pub async fn results_by_agent(&self, agent: &str, limit: usize) -> Result<Vec<JobResult>> {
        self.results.by_agent(agent, limit).await
    }

    pub async fn results_for_workflow(&self, workflow_id: Uuid) -> Result<Option<Vec<JobResult>>> {
        self.workflows.results_for_workflow(workflow_id).await
    }

    /// Renders the newest `limit` results.
    pub async fn render_export(&self, format: ExportFormat, limit: u64) -> Result<String> {
        let results = self.results.list(0, limit).await?;
        match format {
            ExportFormat::Json => export_json(&results, Utc::now()),
            ExportFormat::Text => Ok(export_text(&results, Utc::now())),
        }
    }

    /// Writes the newest `limit` results into `dir`.
    pub async fn export_results(
        &self,
        format: ExportFormat,
        limit: u64,
        dir: &Path,
    ) -> Result<PathBuf> {
        let results = self.results.list(0, limit).await?;
        write_export(&results, format, dir, Utc::now()).await
    }

    /// Per-agent performance over the newest `sample` results.
    pub async fn agent_performance(&self, sample: u64) -> Result<Vec<AgentPerformance>> {
        let agents = self.agents.list(0, AGENT_SCAN_LIMIT).await?;
        let results = self.results.list(0, sample).await?;
        Ok(agent_performance(&agents, &results))
    }

    // ---- agents ----

    /// Seeds the default agents; returns how many were created.
    pub async fn seed_agents(&self) -> Result<usize> {
        self.agents.ensure_defaults().await
    }

    pub async fn register_agent(&self, agent: Agent) -> Result<Agent> {
        self.agents.register(agent).await
    }

    pub async fn get_agent(&self, name: &str) -> Result<Option<Agent>> {
        self.agents.get(name).await
    }

    pub async fn list_agents(&self, offset: u64, limit: u64) -> Result<Vec<Agent>> {
        self.agents.list(offset, limit).await
    }

    // ---- uploads ----

    pub async fn register_upload(&self, upload: NewUpload) -> Result<UploadRecord> {
        self.uploads.register(upload).await
    }

    pub async fn get_upload(&self, upload_id: Uuid) -> Result<Option<UploadRecord>> {
        self.uploads.get(upload_id).await
    }

    pub async fn list_uploads(&self, offset: u64, limit: u64) -> Result<Vec<UploadRecord>> {
        self.uploads.list(offset, limit).await
    }

    // ---- introspection ----

    pub async fn health_snapshot(&self) -> Result<HealthSnapshot> {
        self.health.snapshot().await
    }

    pub async fn analytics_summary(&self) -> Result<AnalyticsSummary> {
        self.analytics.summary().await
    }

    pub async fn trends_24h(&self) -> Result<Vec<TrendPoint>> {
        self.analytics.trends_24h().await
    }

    // ---- reports ----

    /// Writes a Markdown report of freshly computed analytics into `dir`.
    pub async fn generate_report(&self, dir: &Path) -> Result<ReportFile> {
        let summary = self.analytics.refresh().await?;
        reports::write_report(&summary, &self.metrics, dir, Utc::now()).await
    }

    /// Newest-first reports previously written into `dir`.
    pub async fn list_reports(&self, dir: &Path) -> Result<Vec<ReportFile>> {
        reports::list_reports(dir).await
    }

    // ---- workers ----

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            store: self.store.clone(),
            queue: self.queue.clone(),
            index: self.index.clone(),
            results: self.results.clone(),
            agents: self.agents.clone(),
            collaborator: self.collaborator.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// A single worker sharing this dispatcher's components.
    pub fn worker(&self, id: impl Into<String>) -> Worker {
        Worker::new(
            id,
            self.worker_context(),
            WorkerConfig::from_forge(&self.config),
        )
    }

    /// A pool of `num_workers` workers, not yet started.
    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(WorkerConfig::from_forge(&self.config), self.worker_context())
    }
}
