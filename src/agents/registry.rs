//! Agent registry backed by `agent:{name}` records and `agents_index`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::types::{default_agents, normalize_name, Agent, DEFAULT_AGENT};
use crate::error::{ForgeError, Result};
use crate::index::{score_of, IndexKind, IndexManager};
use crate::store::{keys, Store};

/// Upper bound on agents considered by auto-assignment.
const ASSIGNMENT_SCAN_LIMIT: u64 = 200;

/// Keyword groups checked in order; the first group with a hit picks the role.
const ROLE_KEYWORDS: &[(&[&str], &str)] = &[
    (&["test", "qa", "quality", "validate", "verify"], "QA"),
    (&["debug", "fix", "error", "bug"], "Debug"),
    (&["analyze", "review", "audit", "inspect"], "Analyze"),
    (&["code", "develop", "implement", "create"], "Developer"),
];

/// Picks an agent for a task without touching the store.
///
/// Order: keyword role match, then the agent whose skill tags share the most
/// words with the task, then [`DEFAULT_AGENT`].
pub fn assign_agent(task: &str, agents: &[Agent]) -> String {
    let lower = task.to_lowercase();

    for (words, role) in ROLE_KEYWORDS {
        if words.iter().any(|w| lower.contains(w)) {
            if let Some(agent) = agents.iter().find(|a| a.has_role(role)) {
                return agent.name.clone();
            }
            break;
        }
    }

    let task_words: HashSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .collect();

    agents
        .iter()
        .map(|agent| {
            let overlap = agent
                .skills
                .iter()
                .flat_map(|skill| skill.split('_'))
                .filter(|word| task_words.contains(word.to_lowercase().as_str()))
                .count();
            (overlap, agent)
        })
        .filter(|(overlap, _)| *overlap > 0)
        .max_by_key(|(overlap, _)| *overlap)
        .map(|(_, agent)| agent.name.clone())
        .unwrap_or_else(|| DEFAULT_AGENT.to_string())
}

/// Stores, indexes and looks up agents.
#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<dyn Store>,
    index: IndexManager,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn Store>, index: IndexManager) -> Self {
        Self { store, index }
    }

    /// Creates any missing default agent. Returns how many were created.
    pub async fn ensure_defaults(&self) -> Result<usize> {
        let mut created = 0;
        for agent in default_agents() {
            if self.store.exists(&keys::agent_key(&agent.name)).await? {
                continue;
            }
            self.write(&agent).await?;
            created += 1;
        }
        if created > 0 {
            info!(created = created, "Seeded default agents");
        }
        Ok(created)
    }

    /// Registers or redefines an agent. Completion stats of an existing agent
    /// with the same name are kept.
    pub async fn register(&self, agent: Agent) -> Result<Agent> {
        let mut agent = agent;
        agent.name = normalize_name(&agent.name);
        if agent.name.is_empty() {
            return Err(ForgeError::InvalidInput("agent name must not be empty".to_string()));
        }
        if agent.role.trim().is_empty() {
            return Err(ForgeError::InvalidInput("agent role must not be empty".to_string()));
        }

        if let Some(existing) = self.get(&agent.name).await? {
            agent.task_count = existing.task_count;
            agent.last_completed = existing.last_completed;
            agent.created_at = existing.created_at;
        }

        self.write(&agent).await?;
        info!(agent = %agent.name, role = %agent.role, "Agent registered");
        Ok(agent)
    }

    async fn write(&self, agent: &Agent) -> Result<()> {
        let raw = serde_json::to_string(agent)?;
        self.store
            .set(&keys::agent_key(&agent.name), &raw, None)
            .await?;
        self.index
            .index_or_report(IndexKind::Agents, &agent.name, score_of(agent.created_at))
            .await;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<Agent>> {
        let raw = self.store.get(&keys::agent_key(&normalize_name(name))).await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(ForgeError::from))
            .transpose()
    }

    /// Agents by registration time, newest first.
    pub async fn list(&self, offset: u64, limit: u64) -> Result<Vec<Agent>> {
        let names = self.index.list(IndexKind::Agents, offset, limit).await?;
        let record_keys: Vec<String> = names.iter().map(|n| keys::agent_key(n)).collect();
        let raws = self.store.get_many(&record_keys).await?;

        let mut agents = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            agents.push(serde_json::from_str(&raw)?);
        }
        Ok(agents)
    }

    /// Resolves the agent for a task that named none.
    pub async fn auto_assign(&self, task: &str) -> Result<String> {
        let mut agents = self.list(0, ASSIGNMENT_SCAN_LIMIT).await?;
        if agents.is_empty() {
            self.ensure_defaults().await?;
            agents = self.list(0, ASSIGNMENT_SCAN_LIMIT).await?;
        }
        let name = assign_agent(task, &agents);
        debug!(agent = %name, "Auto-assigned agent");
        Ok(name)
    }

    /// Bumps an agent's completion count and last-completed timestamp.
    ///
    /// Read-modify-write: concurrent completions for the same agent may lose
    /// an increment. Missing agents are ignored.
    pub async fn record_completion(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        let Some(mut agent) = self.get(name).await? else {
            return Ok(());
        };
        agent.task_count += 1;
        agent.last_completed = Some(at);
        let raw = serde_json::to_string(&agent)?;
        self.store
            .set(&keys::agent_key(&agent.name), &raw, None)
            .await?;
        Ok(())
    }
}
