//! End-to-end dispatch tests against the in-memory store.
//!
//! These drive the public [`Dispatcher`] API with a scripted provider, so
//! they need neither Redis nor network access.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use agent_forge::error::LlmError;
use agent_forge::index::{IndexKind, IndexManager};
use agent_forge::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use agent_forge::metrics::MetricsCollector;
use agent_forge::scheduler::{Iteration, Job, JobQueue, JobStatus, Priority};
use agent_forge::store::{MemoryStore, Store};
use agent_forge::workflow::{StepStatus, WorkflowOptions, WorkflowState};
use agent_forge::{Dispatcher, ForgeConfig, JobRequest};

/// Echoes the task back after an optional delay.
struct ScriptedProvider {
    delay: Duration,
}

impl ScriptedProvider {
    fn instant() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let task = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(GenerationResponse {
            id: "scripted".to_string(),
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(format!("done: {}", task)),
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage::default(),
        })
    }
}

fn test_config() -> ForgeConfig {
    ForgeConfig::default().with_poll_interval(Duration::from_millis(10))
}

fn dispatcher_with(
    config: ForgeConfig,
    provider: ScriptedProvider,
) -> (Arc<dyn Store>, Dispatcher) {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::with_store(config, store.clone(), Arc::new(provider)).unwrap();
    (store, dispatcher)
}

#[tokio::test]
async fn test_high_priority_dequeued_first() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let queue = JobQueue::new(store, Arc::new(MetricsCollector::new().unwrap()));

    let low_a = Job::new("low a").with_priority(Priority::Low);
    let high = Job::new("high").with_priority(Priority::High);
    let low_b = Job::new("low b").with_priority(Priority::Low);
    for job in [&low_a, &high, &low_b] {
        queue.enqueue(job).await.unwrap();
    }

    let mut order = Vec::new();
    while let Some(job) = queue.dequeue().await.unwrap() {
        order.push(job.id);
    }
    assert_eq!(order, vec![high.id, low_a.id, low_b.id]);
}

#[tokio::test]
async fn test_concurrent_dequeue_claims_each_job_once() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let queue = JobQueue::new(store, Arc::new(MetricsCollector::new().unwrap()));

    let mut expected = HashSet::new();
    for i in 0..40 {
        let priority = [Priority::High, Priority::Normal, Priority::Low][i % 3];
        let job = Job::new(format!("job {}", i)).with_priority(priority);
        expected.insert(queue.enqueue(&job).await.unwrap());
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = queue.dequeue().await.unwrap() {
                    claimed.push(job.id);
                    tokio::task::yield_now().await;
                }
                claimed
            })
        })
        .collect();

    let mut claimed: Vec<Uuid> = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap());
    }
    let unique: HashSet<Uuid> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), 40);
    assert_eq!(unique, expected);
}

#[tokio::test]
async fn test_workflow_runs_to_completion() {
    let (_, dispatcher) = dispatcher_with(test_config(), ScriptedProvider::instant());
    dispatcher.seed_agents().await.unwrap();

    let workflow = dispatcher
        .create_workflow("Harden the login endpoint", WorkflowOptions::default().with_qa())
        .await
        .unwrap();
    assert!(workflow.steps.iter().all(|s| s.status == StepStatus::Queued));
    let pending = dispatcher
        .get_workflow_status(workflow.workflow_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, WorkflowState::Pending);
    assert_eq!(pending.completed_steps, 0);

    let mut worker = dispatcher.worker("worker-test");
    let mut rounds = 0;
    while !matches!(worker.run_once().await.unwrap(), Iteration::Idle) {
        rounds += 1;
        assert!(rounds < 100, "workflow did not drain");
    }

    let report = dispatcher
        .get_workflow_status(workflow.workflow_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, WorkflowState::Completed);
    assert_eq!(report.completed_steps, report.total_steps);
    assert_eq!(report.total_steps, workflow.steps.len());

    // Every step after the first saw its predecessor's output.
    let results = dispatcher
        .results_for_workflow(workflow.workflow_id)
        .await
        .unwrap()
        .unwrap();
    for result in results.iter().skip(1) {
        let output = result.output.as_deref().unwrap_or_default();
        assert!(output.contains("Output of the previous step"));
    }
}

#[tokio::test]
async fn test_collaborator_timeout_fails_job_and_worker_continues() {
    let config = test_config().with_job_timeout(Duration::from_millis(50));
    let (_, dispatcher) = dispatcher_with(config, ScriptedProvider::slow(Duration::from_secs(2)));
    dispatcher.seed_agents().await.unwrap();

    let first = dispatcher
        .enqueue_job(JobRequest::new("Summarize the changelog"))
        .await
        .unwrap();
    let second = dispatcher
        .enqueue_job(JobRequest::new("Review the release notes"))
        .await
        .unwrap();

    let mut worker = dispatcher.worker("worker-timeout");
    assert!(matches!(
        worker.run_once().await.unwrap(),
        Iteration::Processed(JobStatus::Failed)
    ));
    assert!(matches!(
        worker.run_once().await.unwrap(),
        Iteration::Processed(JobStatus::Failed)
    ));
    assert!(matches!(worker.run_once().await.unwrap(), Iteration::Idle));

    for id in [first, second] {
        let result = dispatcher.get_result(id).await.unwrap().unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.output.is_none());
        assert!(result.error.is_some());
    }
}

#[tokio::test]
async fn test_health_snapshot_is_stable_within_ttl() {
    let (_, dispatcher) = dispatcher_with(test_config(), ScriptedProvider::instant());

    let first = dispatcher.health_snapshot().await.unwrap();
    dispatcher
        .enqueue_job(JobRequest::new("Queued after the first snapshot"))
        .await
        .unwrap();
    let second = dispatcher.health_snapshot().await.unwrap();

    assert_eq!(first.generated_at, second.generated_at);
    assert_eq!(first.queue_depth, second.queue_depth);
    assert!(first.store_connected);
}

#[tokio::test]
async fn test_completed_job_adds_one_index_entry() {
    let (store, dispatcher) = dispatcher_with(test_config(), ScriptedProvider::instant());
    dispatcher.seed_agents().await.unwrap();
    let index = IndexManager::new(store, dispatcher.metrics().clone());

    let before = index.count(IndexKind::Results).await.unwrap();
    let job_id = dispatcher
        .enqueue_job(JobRequest::new("Check this summary for errors").with_agent("QA Bot"))
        .await
        .unwrap();

    let mut worker = dispatcher.worker("worker-index");
    assert!(matches!(
        worker.run_once().await.unwrap(),
        Iteration::Processed(JobStatus::Completed)
    ));
    assert_eq!(index.count(IndexKind::Results).await.unwrap(), before + 1);

    let listed = dispatcher.list_results(0, 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].job_id, job_id);
    assert_eq!(listed[0].agent, "qa_bot");
}

#[tokio::test]
async fn test_pool_waits_for_slow_predecessor() {
    let config = test_config().with_num_workers(4);
    let (_, dispatcher) = dispatcher_with(
        config,
        ScriptedProvider::slow(Duration::from_millis(1500)),
    );
    dispatcher.seed_agents().await.unwrap();
    let workflow = dispatcher
        .create_workflow("Plan the schema migration", WorkflowOptions::default())
        .await
        .unwrap();

    let mut pool = dispatcher.worker_pool();
    pool.start().unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    let report = loop {
        let report = dispatcher
            .get_workflow_status(workflow.workflow_id)
            .await
            .unwrap()
            .unwrap();
        if matches!(report.status, WorkflowState::Completed | WorkflowState::Failed)
            || tokio::time::Instant::now() > deadline
        {
            break report;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    pool.shutdown().await.unwrap();

    assert_eq!(report.status, WorkflowState::Completed);
    // Idle workers kept popping the waiting step well past any small
    // per-dequeue budget.
    assert!(pool.stats().jobs_deferred > 50);
    assert_eq!(pool.stats().jobs_failed, 0);
}

#[tokio::test]
async fn test_generate_report_reflects_processed_jobs() {
    let (_, dispatcher) = dispatcher_with(test_config(), ScriptedProvider::instant());
    dispatcher.seed_agents().await.unwrap();
    let dir = tempfile::TempDir::new().unwrap();

    // Cache an empty summary first; the report must not reuse it.
    assert_eq!(dispatcher.analytics_summary().await.unwrap().totals.results, 0);

    dispatcher
        .enqueue_job(JobRequest::new("Summarize the incident log"))
        .await
        .unwrap();
    let mut worker = dispatcher.worker("worker-report");
    assert!(matches!(
        worker.run_once().await.unwrap(),
        Iteration::Processed(JobStatus::Completed)
    ));

    let report = dispatcher.generate_report(dir.path()).await.unwrap();
    assert!(report.filename.starts_with("weekly_report_"));
    let body = std::fs::read_to_string(&report.path).unwrap();
    assert!(body.contains("- Total Results: 1"));
    assert!(body.contains("- Last 1h Tasks: 1"));
    assert!(body.contains("- Reports Generated: 1"));

    let listed = dispatcher.list_reports(dir.path()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].filename, report.filename);
}
