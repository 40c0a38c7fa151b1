//! Job definitions for the scheduler.
//!
//! This module defines the core job types used in the scheduling system:
//!
//! - `Job`: A unit of work to be executed by workers
//! - `Priority`: The queue tier a job is dispatched from
//! - `JobResult`: Terminal, immutable outcome of a job
//! - `JobStatus`: Status of a completed job

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::keys;

/// Priority tier of a job.
///
/// Dequeue is strict: every `High` job is drained before any `Normal` job,
/// and every `Normal` before any `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Tiers in dequeue order.
    pub const ORDERED: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// List key holding this tier.
    pub fn queue_key(&self) -> &'static str {
        match self {
            Priority::High => keys::QUEUE_HIGH,
            Priority::Normal => keys::QUEUE_NORMAL,
            Priority::Low => keys::QUEUE_LOW,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" | "medium" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// A job representing a unit of work to be executed.
///
/// Jobs travel through the queue lists as JSON. Once popped, a job is owned
/// by exactly one worker until its result is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, shared with the job's result.
    pub id: Uuid,
    /// Task description handed to the collaborator.
    pub task: String,
    /// Target agent; resolved by the worker when absent.
    #[serde(default)]
    pub agent: Option<String>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub workflow_id: Option<Uuid>,
    #[serde(default)]
    pub step: Option<String>,
    /// Predecessor job that must reach a terminal state first.
    #[serde(default)]
    pub depends_on: Option<Uuid>,
    /// An optional step's failure does not fail its workflow.
    #[serde(default)]
    pub optional: bool,
    /// Times this job was requeued waiting for its predecessor.
    #[serde(default)]
    pub deferrals: u32,
    /// Optional metadata for tracking and debugging.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Job {
    /// Creates a new job with normal priority and a fresh id.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            agent: None,
            priority: Priority::Normal,
            created_at: Utc::now(),
            workflow_id: None,
            step: None,
            depends_on: None,
            optional: false,
            deferrals: 0,
            metadata: None,
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

    /// Links the job to a workflow step.
    pub fn with_workflow_step(mut self, workflow_id: Uuid, step: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id);
        self.step = Some(step.into());
        self
    }

    pub fn with_depends_on(mut self, predecessor: Uuid) -> Self {
        self.depends_on = Some(predecessor);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Sets optional metadata for the job.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Returns how long ago the job was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Terminal status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a job execution, stored at `result:{job_id}`.
///
/// Immutable once written; a retry is a new job with a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub agent: String,
    pub role: String,
    pub status: JobStatus,
    /// Collaborator output on success.
    #[serde(default)]
    pub output: Option<String>,
    /// Error detail on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Originating task description.
    pub task: String,
    #[serde(default)]
    pub workflow_id: Option<Uuid>,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub model: Option<String>,
    pub worker_id: String,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Executing agent for a result.
#[derive(Debug, Clone)]
pub struct Executor<'a> {
    pub agent: &'a str,
    pub role: &'a str,
    pub model: Option<&'a str>,
    pub worker_id: &'a str,
}

impl JobResult {
    fn from_job(job: &Job, by: &Executor<'_>, status: JobStatus, duration_ms: u64) -> Self {
        Self {
            job_id: job.id,
            agent: by.agent.to_string(),
            role: by.role.to_string(),
            status,
            output: None,
            error: None,
            task: job.task.clone(),
            workflow_id: job.workflow_id,
            step: job.step.clone(),
            optional: job.optional,
            model: by.model.map(str::to_string),
            worker_id: by.worker_id.to_string(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    /// Creates a completed result carrying the collaborator output.
    pub fn completed(
        job: &Job,
        by: &Executor<'_>,
        output: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        let mut result = Self::from_job(job, by, JobStatus::Completed, duration_ms);
        result.output = Some(output.into());
        result
    }

    /// Creates a failed result with an error detail.
    pub fn failed(job: &Job, by: &Executor<'_>, error: impl Into<String>, duration_ms: u64) -> Self {
        let mut result = Self::from_job(job, by, JobStatus::Failed, duration_ms);
        result.error = Some(error.into());
        result
    }

    /// Returns whether the job completed successfully.
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> Executor<'static> {
        Executor {
            agent: "qa_bot",
            role: "QA",
            model: Some("gpt-4o-mini"),
            worker_id: "worker-0",
        }
    }

    #[test]
    fn test_priority_parsing_and_keys() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("medium".parse::<Priority>().unwrap(), Priority::Normal);
        assert!("urgent".parse::<Priority>().is_err());

        assert_eq!(Priority::High.queue_key(), "queue_high");
        assert_eq!(Priority::Normal.queue_key(), "queue");
        assert_eq!(Priority::Low.queue_key(), "queue_low");
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_job_builder() {
        let wf = Uuid::new_v4();
        let prev = Uuid::new_v4();
        let job = Job::new("Review the parser")
            .with_priority(Priority::Low)
            .with_agent("qa_bot")
            .with_workflow_step(wf, "qa_validation")
            .with_depends_on(prev)
            .optional();

        assert_eq!(job.priority, Priority::Low);
        assert_eq!(job.agent.as_deref(), Some("qa_bot"));
        assert_eq!(job.workflow_id, Some(wf));
        assert_eq!(job.step.as_deref(), Some("qa_validation"));
        assert_eq!(job.depends_on, Some(prev));
        assert!(job.optional);
        assert_eq!(job.deferrals, 0);
    }

    #[test]
    fn test_job_deserializes_without_optional_fields() {
        let json = format!(
            r#"{{"id":"{}","task":"t","priority":"high","created_at":"2024-01-01T00:00:00Z"}}"#,
            Uuid::new_v4()
        );
        let job: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(job.priority, Priority::High);
        assert!(job.depends_on.is_none());
        assert!(!job.optional);
    }

    #[test]
    fn test_job_result_constructors() {
        let job = Job::new("Check the build").optional();

        let ok = JobResult::completed(&job, &executor(), "looks good", 120);
        assert!(ok.is_success());
        assert_eq!(ok.job_id, job.id);
        assert_eq!(ok.output.as_deref(), Some("looks good"));
        assert!(ok.optional);

        let failed = JobResult::failed(&job, &executor(), "timed out", 5);
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("timed out"));

        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
    }
}
