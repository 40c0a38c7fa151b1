//! agent-forge: a Redis-backed multi-agent job dispatcher.
//!
//! Jobs are queued on three priority lists, claimed by worker loops and
//! handed to an LLM collaborator acting as the assigned agent. Workflows
//! chain jobs through `depends_on` links. Results, workflows, agents and
//! uploads are indexed in time-scored sorted sets that back pagination,
//! retention sweeps, health and analytics.

pub mod agents;
pub mod analytics;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod index;
pub mod llm;
pub mod metrics;
pub mod reports;
pub mod results;
pub mod scheduler;
pub mod store;
pub mod uploads;
pub mod workflow;

pub use config::{ConfigError, DependencyPolicy, ForgeConfig};
pub use dispatcher::{Dispatcher, JobRequest};
pub use error::{ForgeError, LlmError, StoreError};
