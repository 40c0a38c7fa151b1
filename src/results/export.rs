//! Result exports and per-agent performance.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::agents::Agent;
use crate::error::Result;
use crate::scheduler::{JobResult, JobStatus};

const UNKNOWN_TASK: &str = "Unknown_Task";

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    /// Markdown-flavoured plain text.
    Text,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "txt" | "text" | "md" | "markdown" => Ok(ExportFormat::Text),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

fn unsafe_filename_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\w.\-]").expect("filename pattern is a valid regex"))
}

/// Replaces every character other than letters, digits, `.`, `_` and `-`
/// with `_`.
pub fn sanitize_filename(name: &str) -> String {
    unsafe_filename_chars().replace_all(name, "_").into_owned()
}

/// Task of the most recently completed result.
pub fn latest_task_name(results: &[JobResult]) -> String {
    results
        .iter()
        .max_by_key(|r| r.completed_at)
        .map(|r| r.task.trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(UNKNOWN_TASK)
        .to_string()
}

/// Longest task-derived stem kept in an export filename, in characters.
pub const MAX_FILENAME_STEM: usize = 100;

/// Download-style filename, titled by the latest task.
pub fn export_filename(results: &[JobResult], format: ExportFormat) -> String {
    let stem: String = sanitize_filename(&latest_task_name(results))
        .chars()
        .take(MAX_FILENAME_STEM)
        .collect();
    format!("AgentForge_{}.{}", stem, format.extension())
}

#[derive(Serialize)]
struct JsonExport<'a> {
    task: String,
    exported_at: DateTime<Utc>,
    total: usize,
    results: &'a [JobResult],
}

/// Serializes results as a JSON document.
pub fn export_json(results: &[JobResult], now: DateTime<Utc>) -> Result<String> {
    let doc = JsonExport {
        task: latest_task_name(results),
        exported_at: now,
        total: results.len(),
        results,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Renders results as a Markdown report.
pub fn export_text(results: &[JobResult], now: DateTime<Utc>) -> String {
    let mut out = format!(
        "# Agent Forge Results: {}\n\nExported {}\n\n",
        latest_task_name(results),
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );

    for result in results {
        out.push_str(&format!("## Task\n{}\n\n", result.task));
        out.push_str(&format!(
            "Agent: {} ({}) | Status: {} | Duration: {} ms\n\n",
            result.agent, result.role, result.status, result.duration_ms
        ));
        match result.status {
            JobStatus::Completed => {
                let output = result.output.as_deref().unwrap_or("No output available.");
                out.push_str(&format!("### Result\n{}\n\n", output));
            }
            JobStatus::Failed => {
                let error = result.error.as_deref().unwrap_or("unknown error");
                out.push_str(&format!("### Error\n{}\n\n", error));
            }
        }
        out.push_str(&format!(
            "Completed {}\n\n---\n\n",
            result.completed_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    out
}

/// Renders `results` in `format` and writes it into `dir`, returning the path.
pub async fn write_export(
    results: &[JobResult],
    format: ExportFormat,
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let body = match format {
        ExportFormat::Json => export_json(results, now)?,
        ExportFormat::Text => export_text(results, now),
    };
    let path = dir.join(export_filename(results, format));
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

/// Aggregated performance of one agent over a sample of results.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentPerformance {
    pub agent_name: String,
    pub role: String,
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    /// Percentage, two decimals.
    pub success_rate: f64,
    pub average_ms: f64,
    pub fastest_ms: u64,
    pub slowest_ms: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl AgentPerformance {
    fn empty(name: &str, role: &str) -> Self {
        Self {
            agent_name: name.to_string(),
            role: role.to_string(),
            total_tasks: 0,
            successful_tasks: 0,
            failed_tasks: 0,
            success_rate: 0.0,
            average_ms: 0.0,
            fastest_ms: 0,
            slowest_ms: 0,
            last_activity: None,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Aggregates per-agent performance.
///
/// Every known agent gets an entry, even without results; results from agents
/// not in `agents` get one too, with the role recorded on the result.
pub fn agent_performance(agents: &[Agent], results: &[JobResult]) -> Vec<AgentPerformance> {
    let mut by_name: BTreeMap<String, AgentPerformance> = agents
        .iter()
        .map(|a| (a.name.clone(), AgentPerformance::empty(&a.name, &a.role)))
        .collect();
    let mut total_ms: BTreeMap<String, u64> = BTreeMap::new();

    for result in results {
        let perf = by_name
            .entry(result.agent.clone())
            .or_insert_with(|| AgentPerformance::empty(&result.agent, &result.role));

        perf.total_tasks += 1;
        match result.status {
            JobStatus::Completed => perf.successful_tasks += 1,
            JobStatus::Failed => perf.failed_tasks += 1,
        }
        perf.fastest_ms = if perf.total_tasks == 1 {
            result.duration_ms
        } else {
            perf.fastest_ms.min(result.duration_ms)
        };
        perf.slowest_ms = perf.slowest_ms.max(result.duration_ms);
        if perf.last_activity.map_or(true, |at| result.completed_at > at) {
            perf.last_activity = Some(result.completed_at);
        }
        *total_ms.entry(result.agent.clone()).or_default() += result.duration_ms;
    }

    by_name
        .into_values()
        .map(|mut perf| {
            if perf.total_tasks > 0 {
                let total = perf.total_tasks as f64;
                perf.success_rate = round2(perf.successful_tasks as f64 / total * 100.0);
                let ms = total_ms.get(&perf.agent_name).copied().unwrap_or(0);
                perf.average_ms = round2(ms as f64 / total);
            }
            perf
        })
        .collect()
}
