//! Agent records and the built-in roster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent used when nothing better matches.
pub const DEFAULT_AGENT: &str = "general_assistant";
/// Agent that reviews other agents' output.
pub const QA_AGENT: &str = "qa_bot";
/// Agent that analyses uploaded projects.
pub const ANALYZER_AGENT: &str = "analyzer_bot";
/// Model given to agents registered without one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const BASE_PROMPT: &str = "You are an agent-forge AI development assistant.";

/// A named worker persona, stored at `agent:{name}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub name: String,
    /// Core function, e.g. `QA`, `Debug`, `Analyze`.
    pub role: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub model: String,
    /// Jobs this agent has finished.
    #[serde(default)]
    pub task_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_completed: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: normalize_name(&name.into()),
            role: role.into(),
            description: None,
            skills: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            task_count: 0,
            created_at: Utc::now(),
            last_completed: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// System instructions handed to the collaborator for this agent.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("{} You act as {} ({} role).", BASE_PROMPT, self.name, self.role);
        if let Some(description) = &self.description {
            prompt.push(' ');
            prompt.push_str(description);
            if !description.ends_with('.') {
                prompt.push('.');
            }
        }
        if !self.skills.is_empty() {
            prompt.push_str(" Skills: ");
            prompt.push_str(&self.skills.join(", "));
            prompt.push('.');
        }
        prompt
    }

    /// Whether this agent's role is `role`, accepting noun and verb forms
    /// (`Debug`/`Debugger`, `Analyze`/`Analyzer`).
    pub fn has_role(&self, role: &str) -> bool {
        role_stem(&self.role) == role_stem(role)
    }
}

fn role_stem(role: &str) -> String {
    let lower = role.trim().to_lowercase();
    let stem = lower
        .strip_suffix("ger")
        .map(str::to_string)
        .or_else(|| lower.strip_suffix("zer").map(|s| format!("{}ze", s)))
        .or_else(|| lower.strip_suffix("er").map(str::to_string));
    stem.unwrap_or(lower)
}

/// Store-safe agent name: lowercase with spaces as underscores.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// The four agents every deployment starts with.
pub fn default_agents() -> Vec<Agent> {
    vec![
        Agent::new(DEFAULT_AGENT, "Assistant")
            .with_description("General-purpose AI assistant for various tasks")
            .with_skills(["general_help", "analysis", "writing"]),
        Agent::new(ANALYZER_AGENT, "Analyze")
            .with_description("Reads uploaded projects and generates structured analysis reports")
            .with_skills(["code_summary", "file_classification", "architecture_analysis"]),
        Agent::new(QA_AGENT, "QA")
            .with_description("Reviews AI outputs and scores their correctness")
            .with_skills(["evaluation", "fact_check", "quality_review"]),
        Agent::new("debugger_bot", "Debug")
            .with_description("Runs code lint and identifies errors or logic gaps")
            .with_skills(["static_analysis", "error_fix", "performance_optimization"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roster() {
        let agents = default_agents();
        assert_eq!(agents.len(), 4);
        assert!(agents.iter().all(|a| a.model == DEFAULT_MODEL));
        assert!(agents.iter().any(|a| a.name == QA_AGENT && a.role == "QA"));
    }

    #[test]
    fn test_role_aliases() {
        let debug = Agent::new("d", "Debug");
        assert!(debug.has_role("Debugger"));
        assert!(debug.has_role("debug"));
        let analyze = Agent::new("a", "Analyze");
        assert!(analyze.has_role("Analyzer"));
        assert!(!analyze.has_role("QA"));
        let dev = Agent::new("x", "Developer");
        assert!(dev.has_role("Develop"));
    }

    #[test]
    fn test_system_prompt_mentions_skills() {
        let agent = Agent::new("QA Bot", "QA")
            .with_description("Reviews output")
            .with_skills(["evaluation"]);
        assert_eq!(agent.name, "qa_bot");
        let prompt = agent.system_prompt();
        assert!(prompt.starts_with(BASE_PROMPT));
        assert!(prompt.contains("Reviews output."));
        assert!(prompt.contains("Skills: evaluation."));
    }
}
