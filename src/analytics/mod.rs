//! Analytics over the sorted-set indices.
//!
//! Every count comes from ZCARD or a ranged ZCOUNT on an index, never from
//! scanning records. The summary is memoized for the analytics TTL,
//! independently of the health snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheOutcome, SnapshotCache};
use crate::error::Result;
use crate::index::{score_of, IndexKind, IndexManager, SCORE_STEP};
use crate::metrics::MetricsCollector;

const HOUR_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCount {
    pub tasks: u64,
}

/// Results completed within trailing windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Windows {
    pub h1: WindowCount,
    pub h24: WindowCount,
    pub d7: WindowCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub results: u64,
    pub workflows: u64,
    pub uploads: u64,
    pub agents: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    pub total_tasks_processed: u64,
    /// Mean job duration seen by this process.
    pub avg_processing_time_ms: f64,
    /// Percentage of processed jobs that completed, from this process's
    /// counters.
    pub success_rate: f64,
    pub active_agents_count: u64,
    pub cache_hit_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub generated_at: DateTime<Utc>,
    pub window: Windows,
    pub totals: Totals,
    pub kpis: Kpis,
}

/// One hourly bucket of the 24h trend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// End of the bucket, `HH:MM` UTC.
    pub t: String,
    pub count: u64,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub struct AnalyticsAggregator {
    index: IndexManager,
    metrics: Arc<MetricsCollector>,
    cache: SnapshotCache<AnalyticsSummary>,
}

impl AnalyticsAggregator {
    pub fn new(index: IndexManager, metrics: Arc<MetricsCollector>, ttl: Duration) -> Self {
        Self {
            index,
            metrics,
            cache: SnapshotCache::new(ttl),
        }
    }

    pub async fn summary(&self) -> Result<AnalyticsSummary> {
        self.summary_at(Instant::now()).await
    }

    /// Summary as of `now`, served from cache within the TTL.
    pub async fn summary_at(&self, now: Instant) -> Result<AnalyticsSummary> {
        let served = self.cache.get_or_refresh(now, || self.compute()).await;
        self.metrics
            .record_analytics_request(matches!(served, Ok((_, CacheOutcome::Hit))));

        let (summary, outcome) = served?;
        if !outcome.is_hit() {
            debug!(
                results = summary.totals.results,
                "Analytics summary refreshed"
            );
        }
        Ok(summary)
    }

    /// Recomputes the summary now, discarding any cached value.
    pub async fn refresh(&self) -> Result<AnalyticsSummary> {
        self.cache.invalidate().await;
        self.summary().await
    }

    /// Result counts for the last 24 hours in hourly buckets, oldest first.
    pub async fn trends_24h(&self) -> Result<Vec<TrendPoint>> {
        self.trends_at(Utc::now()).await
    }

    /// Buckets are `(end - 1h, end]`; an entry on a boundary lands in one bucket.
    pub async fn trends_at(&self, now: DateTime<Utc>) -> Result<Vec<TrendPoint>> {
        let end = score_of(now);
        let mut points = Vec::with_capacity(24);
        for hours_back in (0..24).rev() {
            let bucket_end = end - hours_back as f64 * HOUR_SECS;
            let count = self
                .index
                .count_between(
                    IndexKind::Results,
                    bucket_end - HOUR_SECS + SCORE_STEP,
                    bucket_end,
                )
                .await?;
            let label = now - chrono::Duration::hours(hours_back);
            points.push(TrendPoint {
                t: label.format("%H:%M").to_string(),
                count,
            });
        }
        Ok(points)
    }

    async fn results_within(&self, now: f64, hours: f64) -> Result<WindowCount> {
        let tasks = self
            .index
            .count_between(IndexKind::Results, now - hours * HOUR_SECS, now)
            .await?;
        Ok(WindowCount { tasks })
    }

    async fn compute(&self) -> Result<AnalyticsSummary> {
        let generated_at = Utc::now();
        let now = score_of(generated_at);
        let window = Windows {
            h1: self.results_within(now, 1.0).await?,
            h24: self.results_within(now, 24.0).await?,
            d7: self.results_within(now, 7.0 * 24.0).await?,
        };

        let totals = Totals {
            results: self.index.count(IndexKind::Results).await?,
            workflows: self.index.count(IndexKind::Workflows).await?,
            uploads: self.index.count(IndexKind::Uploads).await?,
            agents: self.index.count(IndexKind::Agents).await?,
        };

        let completed = self.metrics.jobs_with_status("completed");
        let failed = self.metrics.jobs_with_status("failed");
        let success_rate = if completed + failed == 0 {
            0.0
        } else {
            round_to(completed as f64 / (completed + failed) as f64 * 100.0, 2)
        };

        let kpis = Kpis {
            total_tasks_processed: totals.results,
            avg_processing_time_ms: round_to(self.metrics.average_job_ms(), 2),
            success_rate,
            active_agents_count: totals.agents,
            cache_hit_ratio: round_to(self.metrics.cache_hit_ratio(), 3),
        };

        Ok(AnalyticsSummary {
            generated_at,
            window,
            totals,
            kpis,
        })
    }
}
