//! Store key layout.
//!
//! Primary records are `kind:{id}` strings; queues are lists; indices are
//! sorted sets scored by unix timestamp.

use std::fmt::Display;

/// High-priority job list.
pub const QUEUE_HIGH: &str = "queue_high";
/// Normal-priority job list.
pub const QUEUE_NORMAL: &str = "queue";
/// Low-priority job list.
pub const QUEUE_LOW: &str = "queue_low";

/// Results index (job results by completion time).
pub const RESULTS_INDEX: &str = "results_index";
/// Workflows index (by creation time).
pub const WORKFLOWS_INDEX: &str = "workflows_index";
/// Agents index (by registration time).
pub const AGENTS_INDEX: &str = "agents_index";
/// Uploads index (by upload time).
pub const UPLOADS_INDEX: &str = "uploads_index";

/// Worker liveness timestamp.
pub const WORKER_HEARTBEAT: &str = "worker:heartbeat";

pub fn result_key(job_id: impl Display) -> String {
    format!("result:{}", job_id)
}

pub fn workflow_key(workflow_id: impl Display) -> String {
    format!("workflow:{}", workflow_id)
}

pub fn agent_key(name: &str) -> String {
    format!("agent:{}", name)
}

pub fn upload_key(upload_id: impl Display) -> String {
    format!("upload:{}", upload_id)
}
