//! OpenAI-compatible chat client.
//!
//! This module provides the request/response types shared by every provider
//! and a client for any `/chat/completions` endpoint (OpenAI, LiteLLM,
//! OpenRouter, local gateways).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ForgeConfig;
use crate::error::LlmError;

/// One chat turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// `system`, `user` or `assistant`.
    pub role: String,
    pub content: String,
}

impl Message {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    /// Agent instructions.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    /// The job's task text.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }
}

/// Body of a `/chat/completions` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Empty means the provider's default model.
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

impl GenerationResponse {
    /// Text of the first choice.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|choice| choice.message.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token accounting reported by the provider; absent on some gateways.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The collaborator boundary: anything that turns a chat request into a reply.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct ChatClient {
    /// Without a trailing slash.
    api_base: String,
    api_key: Option<String>,
    /// Used when a request leaves `model` empty.
    default_model: String,
    http_client: Client,
}

impl ChatClient {
    /// `request_timeout` bounds one HTTP exchange; the collaborator applies
    /// its own job timeout on top.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            http_client,
        })
    }

    /// Client for the configured endpoint, key and default model.
    pub fn from_config(config: &ForgeConfig) -> Result<Self, LlmError> {
        Self::new(
            config.llm_api_base.clone(),
            config.llm_api_key.clone(),
            config.default_model.clone(),
            config.job_timeout,
        )
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// `{"error": {"message": ...}}` body returned on failures.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Maps a non-2xx reply to an error, preferring the provider's own message.
fn api_error(status: u16, body: String) -> LlmError {
    let message = serde_json::from_str::<ApiErrorResponse>(&body)
        .map(|parsed| parsed.error.message)
        .unwrap_or(body);
    match status {
        429 => LlmError::RateLimited(message),
        code => LlmError::ApiError { code, message },
    }
}

#[async_trait]
impl LlmProvider for ChatClient {
    async fn generate(
        &self,
        mut request: GenerationRequest,
    ) -> Result<GenerationResponse, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        if request.model.is_empty() {
            request.model = self.default_model.clone();
        }

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), body));
        }

        response
            .json::<GenerationResponse>()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))
    }
}
