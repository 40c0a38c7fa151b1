//! Multi-step workflows.
//!
//! A workflow is a chain of jobs:
//!
//! ```text
//! admin_analysis ─► specialist_execution ─► qa_validation ─► admin_feedback
//!                                           (optional)
//! ```
//!
//! Every step is enqueued at creation. With chained dependencies each step
//! carries `depends_on` = the previous step's job id, which workers enforce
//! under the strict dependency policy. The workflow record only lists the
//! steps; its status is always derived from the step results on read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::agents::{AgentRegistry, DEFAULT_AGENT, QA_AGENT};
use crate::error::{ForgeError, Result};
use crate::index::{score_of, IndexKind, IndexManager};
use crate::results::ResultStore;
use crate::scheduler::{Job, JobQueue, JobResult, JobStatus, Priority};
use crate::store::{keys, Store};

/// Length of the output excerpt shown per step.
const PREVIEW_CHARS: usize = 300;

pub const STEP_ADMIN_ANALYSIS: &str = "admin_analysis";
pub const STEP_SPECIALIST: &str = "specialist_execution";
pub const STEP_QA: &str = "qa_validation";
pub const STEP_FEEDBACK: &str = "admin_feedback";

/// Options for [`WorkflowOrchestrator::create_workflow`].
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Adds QA validation and the final admin feedback step.
    pub requires_qa: bool,
    /// Adds the admin feedback step even without QA.
    pub with_feedback: bool,
    /// Links each step to its predecessor with `depends_on`.
    pub chain_dependencies: bool,
    pub priority: Priority,
    /// Agent for the specialist step; auto-assigned when absent.
    pub specialist: Option<String>,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            requires_qa: false,
            with_feedback: false,
            chain_dependencies: true,
            priority: Priority::Normal,
            specialist: None,
        }
    }
}

impl WorkflowOptions {
    pub fn with_qa(mut self) -> Self {
        self.requires_qa = true;
        self
    }

    pub fn with_feedback(mut self) -> Self {
        self.with_feedback = true;
        self
    }

    pub fn without_dependencies(mut self) -> Self {
        self.chain_dependencies = false;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_specialist(mut self, agent: impl Into<String>) -> Self {
        self.specialist = Some(agent.into());
        self
    }
}

/// A step before it becomes a job.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub step: &'static str,
    pub agent: String,
    pub task: String,
    pub optional: bool,
}

/// Builds the ordered step list for a task.
pub fn plan_steps(task: &str, specialist: &str, options: &WorkflowOptions) -> Vec<PlannedStep> {
    let mut steps = vec![
        PlannedStep {
            step: STEP_ADMIN_ANALYSIS,
            agent: DEFAULT_AGENT.to_string(),
            task: format!("Analyze task and produce execution plan: {}", task),
            optional: false,
        },
        PlannedStep {
            step: STEP_SPECIALIST,
            agent: specialist.to_string(),
            task: task.to_string(),
            optional: false,
        },
    ];

    if options.requires_qa {
        steps.push(PlannedStep {
            step: STEP_QA,
            agent: QA_AGENT.to_string(),
            task: format!("Review and evaluate specialist output for: {}", task),
            optional: true,
        });
    }
    if options.requires_qa || options.with_feedback {
        steps.push(PlannedStep {
            step: STEP_FEEDBACK,
            agent: DEFAULT_AGENT.to_string(),
            task: format!("Provide final summary and recommendations for: {}", task),
            optional: false,
        });
    }
    steps
}

/// One step of a stored workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step: String,
    pub agent: String,
    pub job_id: Uuid,
    #[serde(default)]
    pub depends_on: Option<Uuid>,
    #[serde(default)]
    pub optional: bool,
}

/// Stored at `workflow:{id}`; never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: Uuid,
    pub task: String,
    pub steps: Vec<WorkflowStep>,
    pub qa_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn job_ids(&self) -> Vec<Uuid> {
        self.steps.iter().map(|s| s.job_id).collect()
    }
}

/// Status of one step, read from its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// No result yet. Claimed-but-running jobs read as queued too.
    Queued,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Queued)
    }
}

impl From<JobStatus> for StepStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Completed => StepStatus::Completed,
            JobStatus::Failed => StepStatus::Failed,
        }
    }
}

/// Aggregate workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowState::Pending => "pending",
            WorkflowState::InProgress => "in_progress",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Input to [`derive_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepState {
    pub status: StepStatus,
    pub optional: bool,
}

/// Derives a workflow's status from its steps.
///
/// Any failed required step fails the workflow. Otherwise the workflow is
/// pending while no step is terminal and completed once every step is. A
/// failed optional step counts as terminal.
pub fn derive_status(steps: &[StepState]) -> WorkflowState {
    if steps
        .iter()
        .any(|s| s.status == StepStatus::Failed && !s.optional)
    {
        return WorkflowState::Failed;
    }

    let terminal = steps.iter().filter(|s| s.status.is_terminal()).count();
    if terminal == 0 {
        WorkflowState::Pending
    } else if terminal == steps.len() {
        WorkflowState::Completed
    } else {
        WorkflowState::InProgress
    }
}

/// A step with its current result.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: String,
    pub agent: String,
    pub job_id: Uuid,
    pub depends_on: Option<Uuid>,
    pub optional: bool,
    pub status: StepStatus,
    pub output_preview: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

/// A workflow with its derived status.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub workflow_id: Uuid,
    pub task: String,
    pub status: WorkflowState,
    pub qa_enabled: bool,
    /// Steps whose result is `completed`; failed steps are not counted.
    pub completed_steps: usize,
    pub total_steps: usize,
    pub steps: Vec<StepReport>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowReport {
    /// Report for a workflow whose steps were just enqueued.
    fn queued(workflow: Workflow) -> Self {
        let results = vec![None; workflow.steps.len()];
        Self::build(workflow, results)
    }

    fn build(workflow: Workflow, results: Vec<Option<JobResult>>) -> Self {
        let steps: Vec<StepReport> = workflow
            .steps
            .into_iter()
            .zip(results)
            .map(|(step, result)| StepReport {
                status: result
                    .as_ref()
                    .map_or(StepStatus::Queued, |r| r.status.into()),
                output_preview: result
                    .as_ref()
                    .and_then(|r| r.output.as_deref())
                    .map(preview),
                error: result.as_ref().and_then(|r| r.error.clone()),
                duration_ms: result.as_ref().map(|r| r.duration_ms),
                step: step.step,
                agent: step.agent,
                job_id: step.job_id,
                depends_on: step.depends_on,
                optional: step.optional,
            })
            .collect();

        let states: Vec<StepState> = steps
            .iter()
            .map(|s| StepState {
                status: s.status,
                optional: s.optional,
            })
            .collect();

        Self {
            workflow_id: workflow.workflow_id,
            task: workflow.task,
            status: derive_status(&states),
            qa_enabled: workflow.qa_enabled,
            completed_steps: states
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .count(),
            total_steps: states.len(),
            steps,
            created_at: workflow.created_at,
        }
    }
}

fn preview(output: &str) -> String {
    if output.chars().count() <= PREVIEW_CHARS {
        return output.to_string();
    }
    let mut cut: String = output.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Creates workflows and reports on them.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    store: Arc<dyn Store>,
    queue: JobQueue,
    index: IndexManager,
    results: ResultStore,
    agents: AgentRegistry,
}

impl WorkflowOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        queue: JobQueue,
        index: IndexManager,
        results: ResultStore,
        agents: AgentRegistry,
    ) -> Self {
        Self {
            store,
            queue,
            index,
            results,
            agents,
        }
    }

    /// Enqueues every step, then persists and indexes the workflow record.
    /// Returns the new workflow with every step `queued`.
    ///
    /// # Errors
    ///
    /// - `ForgeError::InvalidInput` for an empty task
    /// - `ForgeError::Store` if a step or the record cannot be written; steps
    ///   enqueued before the failure stay queued
    pub async fn create_workflow(
        &self,
        task: &str,
        options: WorkflowOptions,
    ) -> Result<WorkflowReport> {
        JobQueue::validate_task(task)?;
        self.agents.ensure_defaults().await?;

        let specialist = match &options.specialist {
            Some(agent) => agent.clone(),
            None => self.agents.auto_assign(task).await?,
        };

        let workflow_id = Uuid::new_v4();
        let mut steps = Vec::new();
        let mut previous: Option<Uuid> = None;

        for planned in plan_steps(task, &specialist, &options) {
            let mut job = Job::new(planned.task)
                .with_agent(planned.agent.clone())
                .with_priority(options.priority)
                .with_workflow_step(workflow_id, planned.step);
            if planned.optional {
                job = job.optional();
            }
            let depends_on = previous.filter(|_| options.chain_dependencies);
            if let Some(parent) = depends_on {
                job = job.with_depends_on(parent);
            }

            self.queue.enqueue(&job).await?;
            steps.push(WorkflowStep {
                step: planned.step.to_string(),
                agent: planned.agent,
                job_id: job.id,
                depends_on,
                optional: planned.optional,
            });
            previous = Some(job.id);
        }

        let workflow = Workflow {
            workflow_id,
            task: task.to_string(),
            steps,
            qa_enabled: options.requires_qa,
            created_at: Utc::now(),
        };

        let raw = serde_json::to_string(&workflow)?;
        self.store
            .set(&keys::workflow_key(workflow_id), &raw, None)
            .await?;
        self.index
            .index_or_report(
                IndexKind::Workflows,
                &workflow_id.to_string(),
                score_of(workflow.created_at),
            )
            .await;

        info!(
            workflow_id = %workflow_id,
            steps = workflow.steps.len(),
            specialist = %specialist,
            "Workflow created"
        );
        Ok(WorkflowReport::queued(workflow))
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<Option<Workflow>> {
        match self.store.get(&keys::workflow_key(workflow_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Current status of a workflow, derived from its step results.
    pub async fn get_workflow_status(&self, workflow_id: Uuid) -> Result<Option<WorkflowReport>> {
        match self.get_workflow(workflow_id).await? {
            Some(workflow) => Ok(Some(self.report(workflow).await?)),
            None => Ok(None),
        }
    }

    /// Newest-first page of workflows with derived status.
    pub async fn list_workflows(&self, offset: u64, limit: u64) -> Result<Vec<WorkflowReport>> {
        let ids = self.index.list(IndexKind::Workflows, offset, limit).await?;
        let record_keys: Vec<String> = ids.iter().map(keys::workflow_key).collect();
        let raws = self.store.get_many(&record_keys).await?;

        let mut reports = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            let workflow: Workflow = serde_json::from_str(&raw)?;
            reports.push(self.report(workflow).await?);
        }
        Ok(reports)
    }

    /// Results of a workflow's steps that have one, in step order.
    pub async fn results_for_workflow(&self, workflow_id: Uuid) -> Result<Option<Vec<JobResult>>> {
        let Some(workflow) = self.get_workflow(workflow_id).await? else {
            return Ok(None);
        };
        let results = self.results.get_many(&workflow.job_ids()).await?;
        Ok(Some(results.into_iter().flatten().collect()))
    }

    /// Queues a QA review of an existing job's output.
    ///
    /// Returns the review job's id.
    pub async fn admin_review(&self, job_id: Uuid, prompt: &str) -> Result<Uuid> {
        if prompt.trim().is_empty() {
            return Err(ForgeError::InvalidInput(
                "review prompt must not be empty".to_string(),
            ));
        }

        let job = Job::new(format!("{}\n\nOriginal Job ID: {}", prompt.trim(), job_id))
            .with_agent(QA_AGENT)
            .with_metadata(serde_json::json!({
                "mode": "admin_review",
                "original_job_id": job_id,
            }));
        let review_id = self.queue.enqueue(&job).await?;
        info!(review_job_id = %review_id, original_job_id = %job_id, "Admin review queued");
        Ok(review_id)
    }

    async fn report(&self, workflow: Workflow) -> Result<WorkflowReport> {
        let results = self.results.get_many(&workflow.job_ids()).await?;
        Ok(WorkflowReport::build(workflow, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use crate::scheduler::job::Executor;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn state(status: StepStatus, optional: bool) -> StepState {
        StepState { status, optional }
    }

    fn orchestrator() -> (JobQueue, ResultStore, WorkflowOrchestrator) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let index = IndexManager::new(store.clone(), metrics.clone());
        let queue = JobQueue::new(store.clone(), metrics);
        let results = ResultStore::new(store.clone(), index.clone(), Duration::from_secs(3600));
        let agents = AgentRegistry::new(store.clone(), index.clone());
        let orchestrator =
            WorkflowOrchestrator::new(store, queue.clone(), index, results.clone(), agents);
        (queue, results, orchestrator)
    }

    async fn complete(results: &ResultStore, job: &Job, ok: bool) {
        let by = Executor {
            agent: job.agent.as_deref().unwrap_or(DEFAULT_AGENT),
            role: "Assistant",
            model: None,
            worker_id: "worker-0",
        };
        let result = if ok {
            JobResult::completed(job, &by, "x".repeat(400), 3)
        } else {
            JobResult::failed(job, &by, "boom", 3)
        };
        results.save(&result).await.unwrap();
    }

    #[test]
    fn test_derive_status() {
        use StepStatus::*;
        assert_eq!(
            derive_status(&[state(Queued, false), state(Queued, false)]),
            WorkflowState::Pending
        );
        assert_eq!(
            derive_status(&[
                state(Completed, false),
                state(Completed, false),
                state(Queued, false)
            ]),
            WorkflowState::InProgress
        );
        assert_eq!(
            derive_status(&[state(Completed, false); 3]),
            WorkflowState::Completed
        );
        assert_eq!(
            derive_status(&[state(Failed, false), state(Queued, false)]),
            WorkflowState::Failed
        );
        assert_eq!(
            derive_status(&[state(Completed, false), state(Failed, true)]),
            WorkflowState::Completed
        );
        assert_eq!(
            derive_status(&[state(Failed, true), state(Queued, false)]),
            WorkflowState::InProgress
        );
    }

    #[test]
    fn test_plan_steps() {
        let basic = plan_steps("ship it", "debugger_bot", &WorkflowOptions::default());
        let names: Vec<&str> = basic.iter().map(|s| s.step).collect();
        assert_eq!(names, vec![STEP_ADMIN_ANALYSIS, STEP_SPECIALIST]);
        assert_eq!(basic[1].agent, "debugger_bot");
        assert_eq!(basic[1].task, "ship it");

        let full = plan_steps("ship it", "qa_bot", &WorkflowOptions::default().with_qa());
        assert_eq!(full.len(), 4);
        assert!(full[2].optional);
        assert_eq!(full[2].agent, QA_AGENT);
        assert_eq!(full[3].step, STEP_FEEDBACK);

        let feedback = plan_steps("ship it", "qa_bot", &WorkflowOptions::default().with_feedback());
        assert_eq!(feedback.len(), 3);
        assert_eq!(feedback[2].step, STEP_FEEDBACK);
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        let long = preview(&"é".repeat(301));
        assert_eq!(long.chars().count(), 303);
        assert!(long.ends_with("..."));
    }

    #[tokio::test]
    async fn test_create_workflow_chains_steps() {
        let (queue, _, orchestrator) = orchestrator();
        let workflow = orchestrator
            .create_workflow("Audit the billing code", WorkflowOptions::default().with_qa())
            .await
            .unwrap();

        assert_eq!(workflow.steps.len(), 4);
        assert_eq!(workflow.total_steps, 4);
        assert_eq!(workflow.status, WorkflowState::Pending);
        assert!(workflow.steps.iter().all(|s| s.status == StepStatus::Queued));
        assert_eq!(workflow.steps[0].depends_on, None);
        for pair in workflow.steps.windows(2) {
            assert_eq!(pair[1].depends_on, Some(pair[0].job_id));
        }
        assert_eq!(workflow.steps[1].agent, "analyzer_bot");
        assert_eq!(queue.depth().await.unwrap().normal, 4);

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.workflow_id, Some(workflow.workflow_id));
        assert_eq!(first.step.as_deref(), Some(STEP_ADMIN_ANALYSIS));
    }

    #[tokio::test]
    async fn test_status_follows_results() {
        let (queue, results, orchestrator) = orchestrator();
        let workflow = orchestrator
            .create_workflow("Write the changelog", WorkflowOptions::default())
            .await
            .unwrap();

        let report = orchestrator
            .get_workflow_status(workflow.workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.status, WorkflowState::Pending);
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Queued));

        let admin = queue.dequeue().await.unwrap().unwrap();
        complete(&results, &admin, true).await;
        let report = orchestrator
            .get_workflow_status(workflow.workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.status, WorkflowState::InProgress);
        assert_eq!(report.steps[0].output_preview.as_ref().unwrap().len(), 303);

        let specialist = queue.dequeue().await.unwrap().unwrap();
        complete(&results, &specialist, false).await;
        let report = orchestrator
            .get_workflow_status(workflow.workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.status, WorkflowState::Failed);
        assert_eq!(report.steps[1].error.as_deref(), Some("boom"));
        assert_eq!(report.completed_steps, 1);

        let produced = orchestrator
            .results_for_workflow(workflow.workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(produced.len(), 2);
    }

    #[tokio::test]
    async fn test_list_and_missing_workflows() {
        let (_, _, orchestrator) = orchestrator();
        orchestrator
            .create_workflow("one", WorkflowOptions::default())
            .await
            .unwrap();
        orchestrator
            .create_workflow("two", WorkflowOptions::default().without_dependencies())
            .await
            .unwrap();

        let listed = orchestrator.list_workflows(0, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|w| w.status == WorkflowState::Pending));

        let missing = Uuid::new_v4();
        assert!(orchestrator.get_workflow_status(missing).await.unwrap().is_none());
        assert!(orchestrator.results_for_workflow(missing).await.unwrap().is_none());
        assert!(orchestrator
            .create_workflow("   ", WorkflowOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_admin_review_targets_qa_bot() {
        let (queue, _, orchestrator) = orchestrator();
        let original = Uuid::new_v4();
        let review_id = orchestrator
            .admin_review(original, "Check the numbers")
            .await
            .unwrap();

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.id, review_id);
        assert_eq!(job.agent.as_deref(), Some(QA_AGENT));
        assert!(job.task.ends_with(&format!("Original Job ID: {}", original)));
        assert!(orchestrator.admin_review(original, " ").await.is_err());
    }
}
