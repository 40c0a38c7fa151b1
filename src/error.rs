//! Error types for agent-forge operations.
//!
//! Defines the error taxonomy shared across subsystems:
//! - Store access (network, timeout, command failures)
//! - Collaborator (LLM) calls
//! - Index/record consistency
//! - Lookups, serialization and configuration

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the key-value store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation '{op}' timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Store command failed: {0}")]
    Command(#[from] redis::RedisError),
}

impl StoreError {
    /// Returns whether the caller may retry the operation.
    ///
    /// A rejected command (wrong type, bad arguments) fails the same way on
    /// every attempt; only connection-level redis failures are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Timeout { .. } => true,
            StoreError::Command(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
            }
        }
    }
}

/// Errors that can occur while calling the LLM collaborator.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: set OPENAI_API_KEY or LLM_API_KEY")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Collaborator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Top-level error for dispatcher, queue, workflow and worker operations.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Collaborator failure: {0}")]
    Collaborator(#[from] LlmError),

    #[error("Index inconsistency: {kind} '{id}' was written but not indexed: {source}")]
    IndexInconsistency {
        kind: String,
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ForgeError {
    /// Builds a `NotFound` error for the given entity kind and id.
    pub fn not_found(kind: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Returns whether the failure is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ForgeError::Store(e) => e.is_retryable(),
            ForgeError::IndexInconsistency { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience result alias used across the crate.
pub type Result<T, E = ForgeError> = std::result::Result<T, E>;
