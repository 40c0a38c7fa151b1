//! Time-boxed collaborator calls.
//!
//! The worker never calls a provider directly: every call goes through a
//! [`Collaborator`], which bounds it with a timeout, records latency, and
//! turns blank output into an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::client::{GenerationRequest, LlmProvider, Message};
use crate::config::ForgeConfig;
use crate::error::LlmError;
use crate::metrics::MetricsCollector;

/// Wraps an [`LlmProvider`] with the worker's call policy.
#[derive(Clone)]
pub struct Collaborator {
    provider: Arc<dyn LlmProvider>,
    metrics: Arc<MetricsCollector>,
    timeout: Duration,
    max_tokens: u32,
    temperature: f64,
}

impl Collaborator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        metrics: Arc<MetricsCollector>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            metrics,
            timeout,
            max_tokens: 800,
            temperature: 0.7,
        }
    }

    /// Builds a collaborator with timeout and sampling taken from config.
    pub fn from_config(
        provider: Arc<dyn LlmProvider>,
        metrics: Arc<MetricsCollector>,
        config: &ForgeConfig,
    ) -> Self {
        Self::new(provider, metrics, config.job_timeout)
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs one call: `instructions` as the system message, `task` as the
    /// user message.
    ///
    /// # Errors
    ///
    /// - `LlmError::Timeout` if the provider does not answer in time
    /// - `LlmError::EmptyResponse` if the answer has no usable text
    /// - any provider error, unchanged
    pub async fn complete(
        &self,
        model: &str,
        instructions: &str,
        task: &str,
    ) -> Result<String, LlmError> {
        let request = GenerationRequest::new(
            model,
            vec![Message::system(instructions), Message::user(task)],
        )
        .with_max_tokens(self.max_tokens)
        .with_temperature(self.temperature);

        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.provider.generate(request)).await
        {
            Ok(Ok(response)) => match response.first_content().map(str::trim) {
                Some(text) if !text.is_empty() => Ok(text.to_string()),
                _ => Err(LlmError::EmptyResponse),
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LlmError::Timeout(self.timeout)),
        };

        self.metrics
            .record_collaborator(model, outcome.is_ok(), start.elapsed().as_secs_f64());
        outcome
    }
}
