//! Health snapshot and worker liveness.
//!
//! The snapshot aggregates queue depth, result count, store connectivity and
//! worker heartbeat age. It is memoized in a [`SnapshotCache`] for the health
//! TTL, so a burst of health checks costs one set of store reads per window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheOutcome, SnapshotCache};
use crate::error::{Result, StoreError};
use crate::index::{IndexKind, IndexManager};
use crate::metrics::MetricsCollector;
use crate::scheduler::{JobQueue, QueueDepth};
use crate::store::{keys, Store};

/// Writes the worker heartbeat: unix seconds as a decimal string.
pub async fn write_heartbeat(store: &dyn Store, at: DateTime<Utc>) -> Result<(), StoreError> {
    let secs = at.timestamp_millis() as f64 / 1000.0;
    store
        .set(keys::WORKER_HEARTBEAT, &secs.to_string(), None)
        .await
}

/// Reads the last heartbeat, if any worker ever wrote one.
pub async fn read_heartbeat(store: &dyn Store) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw = store.get(keys::WORKER_HEARTBEAT).await?;
    Ok(raw
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64)))
}

/// Formats seconds as `Xh Ym Zs`.
pub fn uptime_human(secs: u64) -> String {
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Worker heartbeat view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLiveness {
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub heartbeat_age_secs: Option<f64>,
    /// False when no heartbeat exists or it is older than the threshold.
    pub alive: bool,
}

impl WorkerLiveness {
    pub fn evaluate(
        last_heartbeat: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Self {
        let age = last_heartbeat.map(|hb| (now - hb).num_milliseconds().max(0) as f64 / 1000.0);
        Self {
            last_heartbeat,
            heartbeat_age_secs: age,
            alive: age.is_some_and(|age| age <= stale_after.as_secs_f64()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub store_connected: bool,
    pub queue_depth: QueueDepth,
    pub total_results: u64,
    pub worker: WorkerLiveness,
    /// Records written without their index entry since process start.
    pub index_inconsistencies: u64,
    pub uptime_secs: u64,
    pub uptime_human: String,
    pub generated_at: DateTime<Utc>,
    pub version: String,
}

/// Computes and caches health snapshots.
pub struct HealthMonitor {
    store: Arc<dyn Store>,
    queue: JobQueue,
    index: IndexManager,
    metrics: Arc<MetricsCollector>,
    cache: SnapshotCache<HealthSnapshot>,
    heartbeat_stale_after: Duration,
    started_at: Instant,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        queue: JobQueue,
        index: IndexManager,
        metrics: Arc<MetricsCollector>,
        ttl: Duration,
        heartbeat_stale_after: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            index,
            metrics,
            cache: SnapshotCache::new(ttl),
            heartbeat_stale_after,
            started_at: Instant::now(),
        }
    }

    /// Current snapshot, served from cache within the TTL.
    pub async fn snapshot(&self) -> Result<HealthSnapshot> {
        self.snapshot_at(Instant::now()).await
    }

    /// Snapshot as of `now`.
    ///
    /// # Errors
    ///
    /// A store failure while recomputing is returned and nothing is cached.
    pub async fn snapshot_at(&self, now: Instant) -> Result<HealthSnapshot> {
        let served = self
            .cache
            .get_or_refresh(now, || self.compute(now))
            .await;
        self.metrics
            .record_health_request(matches!(served, Ok((_, CacheOutcome::Hit))));

        let (snapshot, outcome) = served?;
        if !outcome.is_hit() {
            debug!(status = ?snapshot.status, "Health snapshot refreshed");
        }
        Ok(snapshot)
    }

    /// Worker liveness read directly, bypassing the cache.
    pub async fn worker_liveness(&self) -> Result<WorkerLiveness> {
        let last = read_heartbeat(self.store.as_ref()).await?;
        Ok(WorkerLiveness::evaluate(last, Utc::now(), self.heartbeat_stale_after))
    }

    async fn compute(&self, now: Instant) -> Result<HealthSnapshot> {
        self.store.ping().await?;
        let queue_depth = self.queue.depth().await?;
        let total_results = self.index.count(IndexKind::Results).await?;
        let worker = self.worker_liveness().await?;
        let index_inconsistencies = self.metrics.index_failures();

        let status = if index_inconsistencies > 0 || !worker.alive {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };
        let uptime_secs = now.saturating_duration_since(self.started_at).as_secs();

        Ok(HealthSnapshot {
            status,
            store_connected: true,
            queue_depth,
            total_results,
            worker,
            index_inconsistencies,
            uptime_secs,
            uptime_human: uptime_human(uptime_secs),
            generated_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
