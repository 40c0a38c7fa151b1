//! Priority job queue over the store's list primitives.
//!
//! # Queue Structure
//!
//! Three lists, one per tier:
//!
//! - `queue_high`: drained first
//! - `queue`: normal priority
//! - `queue_low`: drained last
//!
//! Enqueue appends to the tail (RPUSH) and dequeue pops the head (LPOP), so
//! each tier is FIFO. The pop is the store's atomic primitive: a popped job
//! is invisible to every other worker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::job::{Job, Priority};
use crate::error::{ForgeError, Result};
use crate::metrics::MetricsCollector;
use crate::store::Store;

/// Number of queued jobs per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub high: u64,
    pub normal: u64,
    pub low: u64,
}

impl QueueDepth {
    pub fn total(&self) -> u64 {
        self.high + self.normal + self.low
    }
}

/// Strict-priority job queue.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn Store>,
    metrics: Arc<MetricsCollector>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<MetricsCollector>) -> Self {
        Self { store, metrics }
    }

    /// Enqueues a job on its priority tier.
    ///
    /// # Returns
    ///
    /// The job id, generated when the job was built.
    pub async fn enqueue(&self, job: &Job) -> Result<Uuid> {
        let serialized = serde_json::to_string(job)?;
        self.store
            .push(job.priority.queue_key(), &serialized)
            .await?;
        self.metrics.record_enqueue(job.priority.as_str());

        debug!(job_id = %job.id, priority = %job.priority, "Job enqueued");
        Ok(job.id)
    }

    /// Returns a claimed job to the tail of its tier.
    ///
    /// Used by the dependency gate; the job keeps its id.
    pub async fn requeue(&self, job: &Job) -> Result<()> {
        let serialized = serde_json::to_string(job)?;
        self.store
            .push(job.priority.queue_key(), &serialized)
            .await?;
        Ok(())
    }

    /// Pops the next job, high tier first.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(job))` if a job was claimed
    /// - `Ok(None)` if every tier is empty
    ///
    /// An entry that cannot be decoded is dropped with a warning and the scan
    /// continues; it was already removed from the list by the pop.
    pub async fn dequeue(&self) -> Result<Option<Job>> {
        for priority in Priority::ORDERED {
            while let Some(raw) = self.store.pop(priority.queue_key()).await? {
                match serde_json::from_str::<Job>(&raw) {
                    Ok(job) => return Ok(Some(job)),
                    Err(e) => {
                        warn!(
                            queue = priority.queue_key(),
                            error = %e,
                            "Discarding malformed queue entry"
                        );
                    }
                }
            }
        }
        Ok(None)
    }

    /// Current depth of every tier.
    pub async fn depth(&self) -> Result<QueueDepth> {
        let depth = QueueDepth {
            high: self.store.len(Priority::High.queue_key()).await?,
            normal: self.store.len(Priority::Normal.queue_key()).await?,
            low: self.store.len(Priority::Low.queue_key()).await?,
        };
        for (priority, n) in Priority::ORDERED
            .iter()
            .zip([depth.high, depth.normal, depth.low])
        {
            self.metrics.set_queue_depth(priority.queue_key(), n);
        }
        Ok(depth)
    }

    /// Validates a task description before it is queued.
    pub(crate) fn validate_task(task: &str) -> Result<()> {
        if task.trim().is_empty() {
            return Err(ForgeError::InvalidInput("task must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn queue() -> (Arc<MemoryStore>, JobQueue) {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        (store.clone(), JobQueue::new(store, metrics))
    }

    #[tokio::test]
    async fn test_strict_priority_order() {
        let (_, queue) = queue();
        let low = Job::new("low").with_priority(Priority::Low);
        let normal = Job::new("normal");
        let high = Job::new("high").with_priority(Priority::High);

        queue.enqueue(&low).await.unwrap();
        queue.enqueue(&normal).await.unwrap();
        queue.enqueue(&high).await.unwrap();

        let order: Vec<Uuid> = vec![
            queue.dequeue().await.unwrap().unwrap().id,
            queue.dequeue().await.unwrap().unwrap().id,
            queue.dequeue().await.unwrap().unwrap().id,
        ];
        assert_eq!(order, vec![high.id, normal.id, low.id]);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fifo_within_tier_and_requeue_goes_to_tail() {
        let (_, queue) = queue();
        let first = Job::new("first");
        let second = Job::new("second");
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        let claimed = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        queue.requeue(&claimed).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, second.id);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_depth_and_malformed_entries() {
        let (store, queue) = queue();
        queue
            .enqueue(&Job::new("a").with_priority(Priority::High))
            .await
            .unwrap();
        queue.enqueue(&Job::new("b")).await.unwrap();
        store.push("queue_low", "not json").await.unwrap();

        let depth = queue.depth().await.unwrap();
        assert_eq!(depth, QueueDepth { high: 1, normal: 1, low: 1 });
        assert_eq!(depth.total(), 3);

        assert!(queue.dequeue().await.unwrap().is_some());
        assert!(queue.dequeue().await.unwrap().is_some());
        // The malformed entry is consumed and skipped.
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.depth().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let (store, queue) = queue();
        store.set_unavailable(true);
        let err = queue.dequeue().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validate_task() {
        assert!(JobQueue::validate_task("  ").is_err());
        assert!(JobQueue::validate_task("do it").is_ok());
    }
}
