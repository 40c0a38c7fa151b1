//! LLM integration for agent-forge.
//!
//! The collaborator boundary of the worker loop: a provider takes
//! `{model, instructions, task}` and returns text or fails.
//!
//! ```ignore
//! use agent_forge::llm::{ChatClient, Collaborator};
//!
//! let client = ChatClient::from_config(&config)?;
//! let collaborator = Collaborator::from_config(Arc::new(client), metrics, &config);
//! let text = collaborator.complete("gpt-4o-mini", "You are a QA agent.", "Review this").await?;
//! ```

pub mod client;
pub mod collaborator;

pub use client::{
    ChatClient, Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
};
pub use collaborator::Collaborator;
