//! Agents: named personas that jobs are routed to.

pub mod registry;
pub mod types;

pub use registry::{assign_agent, AgentRegistry};
pub use types::{
    default_agents, normalize_name, Agent, ANALYZER_AGENT, DEFAULT_AGENT, DEFAULT_MODEL, QA_AGENT,
};
