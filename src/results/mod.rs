//! Result persistence and indexed retrieval.
//!
//! Results live at `result:{job_id}` with the configured TTL and are indexed
//! in `results_index` by completion time. Listing reads a page of ids from the
//! index and fetches the records in one round-trip; ids whose record already
//! expired are skipped until the sweep drops them from the index.

pub mod export;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::Result;
use crate::index::{score_of, IndexKind, IndexManager};
use crate::scheduler::JobResult;
use crate::store::{keys, Store};

pub use export::{
    agent_performance, export_filename, export_json, export_text, sanitize_filename,
    write_export, AgentPerformance, ExportFormat,
};

/// Minimum window scanned when filtering recent results by agent.
const AGENT_SCAN_FLOOR: u64 = 50;

/// Reads and writes job results.
#[derive(Clone)]
pub struct ResultStore {
    store: Arc<dyn Store>,
    index: IndexManager,
    ttl: Duration,
}

impl ResultStore {
    pub fn new(store: Arc<dyn Store>, index: IndexManager, ttl: Duration) -> Self {
        Self { store, index, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Writes the record, then indexes it.
    ///
    /// The write is idempotent (same key, same value) so callers may retry
    /// it. An index failure is reported through the index manager and does
    /// not fail the save. Returns whether the index entry was written.
    pub async fn save(&self, result: &JobResult) -> Result<bool> {
        let raw = serde_json::to_string(result)?;
        self.store
            .set(&keys::result_key(result.job_id), &raw, Some(self.ttl))
            .await?;
        Ok(self
            .index
            .index_or_report(
                IndexKind::Results,
                &result.job_id.to_string(),
                score_of(result.completed_at),
            )
            .await)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<JobResult>> {
        match self.store.get(&keys::result_key(job_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Fetches several results in one round-trip, preserving order.
    pub async fn get_many(&self, job_ids: &[Uuid]) -> Result<Vec<Option<JobResult>>> {
        let record_keys: Vec<String> = job_ids.iter().map(keys::result_key).collect();
        self.decode_all(&record_keys).await
    }

    async fn decode_all(&self, record_keys: &[String]) -> Result<Vec<Option<JobResult>>> {
        let raws = self.store.get_many(record_keys).await?;
        let mut results = Vec::with_capacity(raws.len());
        for raw in raws {
            results.push(match raw {
                Some(raw) => Some(serde_json::from_str(&raw)?),
                None => None,
            });
        }
        Ok(results)
    }

    /// Newest-first page of live results.
    pub async fn list(&self, offset: u64, limit: u64) -> Result<Vec<JobResult>> {
        let ids = self.index.list(IndexKind::Results, offset, limit).await?;
        let record_keys: Vec<String> = ids.iter().map(keys::result_key).collect();
        Ok(self
            .decode_all(&record_keys)
            .await?
            .into_iter()
            .flatten()
            .collect())
    }

    /// Number of indexed results.
    pub async fn count(&self) -> Result<u64> {
        Ok(self.index.count(IndexKind::Results).await?)
    }

    /// Recent results produced by one agent.
    ///
    /// Filters a window of the newest `max(limit * 5, 50)` results rather
    /// than scanning every record.
    pub async fn by_agent(&self, agent: &str, limit: usize) -> Result<Vec<JobResult>> {
        let window = ((limit as u64) * 5).max(AGENT_SCAN_FLOOR);
        Ok(self
            .list(0, window)
            .await?
            .into_iter()
            .filter(|r| r.agent == agent)
            .take(limit)
            .collect())
    }
}
