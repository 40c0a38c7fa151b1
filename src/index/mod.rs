//! Sorted-set indices over primary records.
//!
//! One index per entity kind, scored by unix timestamp, so listing is a
//! reverse-range read and counting is a cardinality read. Neither touches
//! the primary records.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, StoreError};
use crate::metrics::MetricsCollector;
use crate::store::{keys, Store};

/// Entity kinds that carry an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Results,
    Workflows,
    Agents,
    Uploads,
}

impl IndexKind {
    pub const ALL: [IndexKind; 4] = [
        IndexKind::Results,
        IndexKind::Workflows,
        IndexKind::Agents,
        IndexKind::Uploads,
    ];

    /// Sorted-set key for this kind.
    pub fn key(&self) -> &'static str {
        match self {
            IndexKind::Results => keys::RESULTS_INDEX,
            IndexKind::Workflows => keys::WORKFLOWS_INDEX,
            IndexKind::Agents => keys::AGENTS_INDEX,
            IndexKind::Uploads => keys::UPLOADS_INDEX,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Results => "results",
            IndexKind::Workflows => "workflows",
            IndexKind::Agents => "agents",
            IndexKind::Uploads => "uploads",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Smallest step between two scores; scores carry millisecond precision.
pub const SCORE_STEP: f64 = 0.001;

/// Index score for a timestamp: unix seconds with sub-second precision.
pub fn score_of(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Maintains the per-kind sorted-set indices.
#[derive(Clone)]
pub struct IndexManager {
    store: Arc<dyn Store>,
    metrics: Arc<MetricsCollector>,
}

impl IndexManager {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<MetricsCollector>) -> Self {
        Self { store, metrics }
    }

    /// Writes one index entry. Re-indexing an id updates its score.
    pub async fn index(&self, kind: IndexKind, id: &str, score: f64) -> Result<(), StoreError> {
        self.store.zadd(kind.key(), score, id).await
    }

    /// Indexes a freshly written primary record.
    ///
    /// A failure is counted and returned as `ForgeError::IndexInconsistency`:
    /// the record exists but is absent from listings.
    pub async fn index_record(
        &self,
        kind: IndexKind,
        id: &str,
        score: f64,
    ) -> Result<(), ForgeError> {
        self.index(kind, id, score).await.map_err(|source| {
            self.metrics.record_index_failure(kind.as_str());
            ForgeError::IndexInconsistency {
                kind: kind.to_string(),
                id: id.to_string(),
                source,
            }
        })
    }

    /// Like [`IndexManager::index_record`], but logs the failure instead of
    /// propagating it.
    ///
    /// The primary record already exists, so the caller's operation succeeds
    /// either way. An orphaned record stays reachable by id and is counted so
    /// health reports `degraded`. Returns whether the entry was written.
    pub async fn index_or_report(&self, kind: IndexKind, id: &str, score: f64) -> bool {
        match self.index_record(kind, id, score).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    kind = %kind,
                    id = %id,
                    error = %e,
                    "Record written but not indexed"
                );
                false
            }
        }
    }

    /// Reverse-chronological page of ids.
    pub async fn list(
        &self,
        kind: IndexKind,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<String>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = offset.saturating_add(limit - 1);
        self.store.zrevrange(kind.key(), offset, stop).await
    }

    /// Number of indexed entities of a kind.
    pub async fn count(&self, kind: IndexKind) -> Result<u64, StoreError> {
        self.store.zcard(kind.key()).await
    }

    /// Number of entries scored within `[from, to]`.
    pub async fn count_between(
        &self,
        kind: IndexKind,
        from: f64,
        to: f64,
    ) -> Result<u64, StoreError> {
        self.store.zcount(kind.key(), from, to).await
    }

    /// Removes entries scored strictly before `cutoff`.
    pub async fn sweep(&self, kind: IndexKind, cutoff: f64) -> Result<u64, StoreError> {
        let removed = self
            .store
            .zremrangebyscore(kind.key(), f64::NEG_INFINITY, cutoff - SCORE_STEP)
            .await?;
        if removed > 0 {
            tracing::debug!(kind = %kind, removed = removed, "Swept expired index entries");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> (Arc<MemoryStore>, Arc<MetricsCollector>, IndexManager) {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let index = IndexManager::new(store.clone(), metrics.clone());
        (store, metrics, index)
    }

    #[tokio::test]
    async fn test_list_is_reverse_chronological() {
        let (_, _, index) = manager();
        index.index(IndexKind::Results, "a", 1.0).await.unwrap();
        index.index(IndexKind::Results, "b", 2.0).await.unwrap();
        index.index(IndexKind::Results, "c", 3.0).await.unwrap();

        assert_eq!(index.list(IndexKind::Results, 0, 2).await.unwrap(), vec!["c", "b"]);
        assert_eq!(index.list(IndexKind::Results, 2, 2).await.unwrap(), vec!["a"]);
        assert!(index.list(IndexKind::Results, 0, 0).await.unwrap().is_empty());
        assert_eq!(index.count(IndexKind::Results).await.unwrap(), 3);
        assert_eq!(index.count(IndexKind::Workflows).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_between_and_sweep() {
        let (_, _, index) = manager();
        for (id, score) in [("old", 100.0), ("mid", 200.0), ("new", 300.0)] {
            index.index(IndexKind::Uploads, id, score).await.unwrap();
        }

        assert_eq!(
            index.count_between(IndexKind::Uploads, 150.0, f64::INFINITY).await.unwrap(),
            2
        );
        assert_eq!(index.sweep(IndexKind::Uploads, 200.0).await.unwrap(), 1);
        assert_eq!(index.count(IndexKind::Uploads).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_index_failure_is_reported() {
        let (store, metrics, index) = manager();
        store.fail_sorted_set_writes(true);

        assert!(!index.index_or_report(IndexKind::Workflows, "wf", 1.0).await);
        assert_eq!(metrics.index_failures(), 1);

        store.fail_sorted_set_writes(false);
        assert!(index.index_or_report(IndexKind::Workflows, "wf", 1.0).await);
        assert_eq!(metrics.index_failures(), 1);
    }

    #[tokio::test]
    async fn test_index_record_returns_inconsistency() {
        let (store, metrics, index) = manager();
        store.fail_sorted_set_writes(true);

        let err = index
            .index_record(IndexKind::Results, "job-1", 1.0)
            .await
            .unwrap_err();
        match &err {
            ForgeError::IndexInconsistency { kind, id, .. } => {
                assert_eq!(kind, "results");
                assert_eq!(id, "job-1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_retryable());
        assert_eq!(metrics.index_failures(), 1);
    }

    #[tokio::test]
    async fn test_list_with_extreme_bounds() {
        let (_, _, index) = manager();
        index.index(IndexKind::Results, "a", 1.0).await.unwrap();
        index.index(IndexKind::Results, "b", 2.0).await.unwrap();

        assert_eq!(
            index.list(IndexKind::Results, 1, u64::MAX).await.unwrap(),
            vec!["a"]
        );
        assert!(index
            .list(IndexKind::Results, u64::MAX, u64::MAX)
            .await
            .unwrap()
            .is_empty());
        assert!(index
            .list(IndexKind::Results, u64::MAX - 1, 1)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_kind_keys() {
        assert_eq!(IndexKind::Results.key(), "results_index");
        assert_eq!(IndexKind::Agents.to_string(), "agents");
        let score = score_of(DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap());
        assert!((score - 1_700_000_000.5).abs() < 1e-6);
    }
}
