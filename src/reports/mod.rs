//! Markdown summary reports written to disk.
//!
//! A report is a point-in-time rendering of the analytics summary (KPIs,
//! trailing windows and index totals) plus a few process counters. Reports
//! are plain files named `weekly_report_<UTC timestamp>.md`, so listing is a
//! directory read.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::analytics::AnalyticsSummary;
use crate::error::Result;
use crate::metrics::MetricsCollector;

const REPORT_PREFIX: &str = "weekly_report_";
const REPORT_EXTENSION: &str = ".md";

/// Most reports returned by [`list_reports`].
pub const MAX_LISTED_REPORTS: usize = 50;

/// A report file on disk.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportFile {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// `weekly_report_YYYYmmdd_HHMMSS.md` for `now`.
pub fn report_filename(now: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        REPORT_PREFIX,
        now.format("%Y%m%d_%H%M%S"),
        REPORT_EXTENSION
    )
}

fn is_report_filename(name: &str) -> bool {
    name.starts_with(REPORT_PREFIX) && name.ends_with(REPORT_EXTENSION)
}

/// Renders the report body.
pub fn render_report(
    summary: &AnalyticsSummary,
    metrics: &MetricsCollector,
    now: DateTime<Utc>,
) -> String {
    let kpis = &summary.kpis;
    let window = &summary.window;
    let totals = &summary.totals;

    let lines = [
        format!("# Weekly Report: {}", now.format("%Y-%m-%d %H:%M:%S UTC")),
        String::new(),
        "## Summary".to_string(),
        String::new(),
        "### KPIs".to_string(),
        String::new(),
        format!("- Total Tasks Processed: {}", kpis.total_tasks_processed),
        format!("- Active Agents: {}", kpis.active_agents_count),
        format!("- Success Rate (%): {}", kpis.success_rate),
        format!("- Avg Processing Time (ms): {}", kpis.avg_processing_time_ms),
        format!("- Cache Hit Ratio: {}", kpis.cache_hit_ratio),
        String::new(),
        "### Metrics".to_string(),
        String::new(),
        format!("- Active Workers: {}", metrics.active_workers()),
        format!("- Dependency Deferrals: {}", metrics.deferrals()),
        format!("- Index Write Failures: {}", metrics.index_failures()),
        format!("- Analytics Requests: {}", metrics.analytics_requests()),
        format!("- Reports Generated: {}", metrics.reports_generated()),
        String::new(),
        "### Windows".to_string(),
        String::new(),
        format!("- Last 1h Tasks: {}", window.h1.tasks),
        format!("- Last 24h Tasks: {}", window.h24.tasks),
        format!("- Last 7d Tasks: {}", window.d7.tasks),
        String::new(),
        "### Totals".to_string(),
        String::new(),
        format!("- Total Results: {}", totals.results),
        format!("- Total Workflows: {}", totals.workflows),
        format!("- Total Uploads: {}", totals.uploads),
        format!("- Total Agents: {}", totals.agents),
        String::new(),
        "---".to_string(),
        format!("Analytics generated {}", summary.generated_at.to_rfc3339()),
    ];
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Writes a report into `dir`, creating it if needed, and counts it.
pub async fn write_report(
    summary: &AnalyticsSummary,
    metrics: &MetricsCollector,
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<ReportFile> {
    tokio::fs::create_dir_all(dir).await?;
    metrics.record_report();

    let filename = report_filename(now);
    let path = dir.join(&filename);
    let body = render_report(summary, metrics, now);
    tokio::fs::write(&path, &body).await?;

    info!(path = %path.display(), "Report generated");
    Ok(ReportFile {
        filename,
        path,
        size: body.len() as u64,
        modified: now,
    })
}

/// Newest-first reports in `dir`, at most [`MAX_LISTED_REPORTS`].
///
/// A missing directory has no reports. Other files in `dir` are ignored.
pub async fn list_reports(dir: &Path) -> Result<Vec<ReportFile>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut reports = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let filename = entry.file_name().to_string_lossy().into_owned();
        if !is_report_filename(&filename) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        reports.push(ReportFile {
            filename,
            path: entry.path(),
            size: metadata.len(),
            modified,
        });
    }

    // Timestamped names sort chronologically.
    reports.sort_by(|a, b| b.filename.cmp(&a.filename));
    reports.truncate(MAX_LISTED_REPORTS);
    Ok(reports)
}
