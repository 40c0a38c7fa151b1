//! Instance-owned metric collector for dispatch operations.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Metrics collector recording queue, worker, collaborator and cache activity.
///
/// Every counter is a Prometheus atomic, so a single collector can be shared
/// across worker tasks without extra locking.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Registry,
    jobs_enqueued: IntCounterVec,
    jobs_processed: IntCounterVec,
    job_duration: Histogram,
    dependency_deferrals: IntCounter,
    collaborator_requests: IntCounterVec,
    collaborator_latency: HistogramVec,
    queue_depth: IntGaugeVec,
    active_workers: IntGauge,
    health_requests: IntCounter,
    health_cache_hits: IntCounter,
    analytics_requests: IntCounter,
    analytics_cache_hits: IntCounter,
    index_write_failures: IntCounterVec,
    index_write_failures_total: IntCounter,
    reports_generated: IntCounter,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("active_workers", &self.active_workers.get())
            .field("index_write_failures", &self.index_write_failures_total.get())
            .finish_non_exhaustive()
    }
}

impl MetricsCollector {
    /// Creates a collector with a fresh registry and registers every metric.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if a metric definition is invalid.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Queue metrics
        let jobs_enqueued = IntCounterVec::new(
            Opts::new("agent_forge_jobs_enqueued_total", "Jobs enqueued"),
            &["priority"],
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("agent_forge_queue_depth", "Number of jobs in queue"),
            &["queue_name"],
        )?;

        // Worker metrics
        let jobs_processed = IntCounterVec::new(
            Opts::new("agent_forge_jobs_processed_total", "Jobs reaching a terminal state"),
            &["status"],
        )?;
        let job_duration = Histogram::with_opts(
            HistogramOpts::new(
                "agent_forge_job_duration_seconds",
                "Job execution duration in seconds",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        let dependency_deferrals = IntCounter::new(
            "agent_forge_dependency_deferrals_total",
            "Jobs requeued while waiting for a predecessor",
        )?;
        let active_workers =
            IntGauge::new("agent_forge_active_workers", "Number of active workers")?;

        // Collaborator metrics
        let collaborator_requests = IntCounterVec::new(
            Opts::new(
                "agent_forge_collaborator_requests_total",
                "Total collaborator (LLM) requests",
            ),
            &["model", "status"],
        )?;
        let collaborator_latency = HistogramVec::new(
            HistogramOpts::new(
                "agent_forge_collaborator_latency_seconds",
                "Collaborator request latency in seconds",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
            &["model"],
        )?;

        // Cache metrics
        let health_requests =
            IntCounter::new("agent_forge_health_requests_total", "Health snapshot requests")?;
        let health_cache_hits = IntCounter::new(
            "agent_forge_health_cache_hits_total",
            "Health snapshots served from cache",
        )?;
        let analytics_requests = IntCounter::new(
            "agent_forge_analytics_requests_total",
            "Analytics summary requests",
        )?;
        let analytics_cache_hits = IntCounter::new(
            "agent_forge_analytics_cache_hits_total",
            "Analytics summaries served from cache",
        )?;

        // Index metrics
        let index_write_failures = IntCounterVec::new(
            Opts::new(
                "agent_forge_index_write_failures_total",
                "Primary records written without an index entry",
            ),
            &["kind"],
        )?;
        let index_write_failures_total = IntCounter::new(
            "agent_forge_index_write_failures_all_total",
            "Index write failures across all kinds",
        )?;

        // Report metrics
        let reports_generated = IntCounter::new(
            "agent_forge_reports_generated_total",
            "Summary reports written",
        )?;

        registry.register(Box::new(jobs_enqueued.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(jobs_processed.clone()))?;
        registry.register(Box::new(job_duration.clone()))?;
        registry.register(Box::new(dependency_deferrals.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(collaborator_requests.clone()))?;
        registry.register(Box::new(collaborator_latency.clone()))?;
        registry.register(Box::new(health_requests.clone()))?;
        registry.register(Box::new(health_cache_hits.clone()))?;
        registry.register(Box::new(analytics_requests.clone()))?;
        registry.register(Box::new(analytics_cache_hits.clone()))?;
        registry.register(Box::new(index_write_failures.clone()))?;
        registry.register(Box::new(index_write_failures_total.clone()))?;
        registry.register(Box::new(reports_generated.clone()))?;

        Ok(Self {
            registry,
            jobs_enqueued,
            jobs_processed,
            job_duration,
            dependency_deferrals,
            collaborator_requests,
            collaborator_latency,
            queue_depth,
            active_workers,
            health_requests,
            health_cache_hits,
            analytics_requests,
            analytics_cache_hits,
            index_write_failures,
            index_write_failures_total,
            reports_generated,
        })
    }

    /// Registry holding every metric of this collector.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_enqueue(&self, priority: &str) {
        self.jobs_enqueued.with_label_values(&[priority]).inc();
    }

    /// Record a job reaching a terminal state.
    ///
    /// # Arguments
    ///
    /// * `status` - Terminal status (`completed` or `failed`)
    /// * `duration_secs` - Execution duration in seconds
    pub fn record_job(&self, status: &str, duration_secs: f64) {
        self.jobs_processed.with_label_values(&[status]).inc();
        self.job_duration.observe(duration_secs);

        tracing::trace!(
            status = status,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    pub fn record_deferral(&self) {
        self.dependency_deferrals.inc();
    }

    /// Record one collaborator call.
    pub fn record_collaborator(&self, model: &str, success: bool, latency_secs: f64) {
        let status = if success { "success" } else { "failure" };
        self.collaborator_requests
            .with_label_values(&[model, status])
            .inc();
        self.collaborator_latency
            .with_label_values(&[model])
            .observe(latency_secs);
    }

    pub fn set_queue_depth(&self, queue_name: &str, depth: u64) {
        self.queue_depth
            .with_label_values(&[queue_name])
            .set(depth as i64);
    }

    pub fn worker_started(&self) {
        self.active_workers.inc();
    }

    pub fn worker_stopped(&self) {
        self.active_workers.dec();
    }

    pub fn active_workers(&self) -> i64 {
        self.active_workers.get()
    }

    /// Record a health snapshot request and whether it was served from cache.
    pub fn record_health_request(&self, cache_hit: bool) {
        self.health_requests.inc();
        if cache_hit {
            self.health_cache_hits.inc();
        }
    }

    /// Record an analytics summary request and whether it was served from cache.
    pub fn record_analytics_request(&self, cache_hit: bool) {
        self.analytics_requests.inc();
        if cache_hit {
            self.analytics_cache_hits.inc();
        }
    }

    pub fn record_index_failure(&self, kind: &str) {
        self.index_write_failures.with_label_values(&[kind]).inc();
        self.index_write_failures_total.inc();
    }

    /// Total index write failures since start.
    pub fn index_failures(&self) -> u64 {
        self.index_write_failures_total.get()
    }

    pub fn record_report(&self) {
        self.reports_generated.inc();
    }

    pub fn reports_generated(&self) -> u64 {
        self.reports_generated.get()
    }

    /// Analytics summary requests, cached or not.
    pub fn analytics_requests(&self) -> u64 {
        self.analytics_requests.get()
    }

    pub fn deferrals(&self) -> u64 {
        self.dependency_deferrals.get()
    }

    /// Ratio of cache hits to cached requests across health and analytics.
    ///
    /// Returns 0.0 before any request has been observed.
    pub fn cache_hit_ratio(&self) -> f64 {
        let requests = self.health_requests.get() + self.analytics_requests.get();
        if requests == 0 {
            return 0.0;
        }
        let hits = self.health_cache_hits.get() + self.analytics_cache_hits.get();
        hits as f64 / requests as f64
    }

    /// Count of jobs processed with the given terminal status.
    pub fn jobs_with_status(&self, status: &str) -> u64 {
        self.jobs_processed.with_label_values(&[status]).get()
    }

    /// Mean job duration in milliseconds, 0.0 if no job has finished.
    pub fn average_job_ms(&self) -> f64 {
        let count = self.job_duration.get_sample_count();
        if count == 0 {
            return 0.0;
        }
        self.job_duration.get_sample_sum() / count as f64 * 1000.0
    }

    /// Export all metrics in Prometheus text format.
    pub fn export_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}\n", e);
        }

        String::from_utf8(buffer)
            .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
    }
}
