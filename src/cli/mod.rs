//! Command-line interface for agent-forge.
//!
//! Provides commands for running workers, queueing jobs and workflows,
//! and inspecting results, agents, uploads, health and analytics.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
