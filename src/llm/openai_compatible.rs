// ABOUTME: OpenAI-compatible generation backend for cloud and local endpoints
// ABOUTME: Implements buffered and streaming chat completions over the chat/completions API
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! # `OpenAI`-Compatible Backend
//!
//! Generic implementation for any `OpenAI`-compatible chat completions
//! endpoint: the `OpenAI` API itself, Ollama, vLLM, or any other server
//! speaking the same wire format. Configured through [`GenerationConfig`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::{
    create_sse_stream, ChatMessage, ChatRequest, ChatResponse, ChatStream, CompletionOutcome,
    GenerationProvider, StreamChunk, TokenUsage,
};
use crate::config::GenerationConfig;
use crate::errors::AppError;

/// Connection timeout for the backend
const CONNECT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// API Request/Response Types (OpenAI wire format)
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for OpenAiMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(rename = "prompt_tokens")]
    prompt: u32,
    #[serde(rename = "completion_tokens")]
    completion: u32,
    #[serde(rename = "total_tokens")]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Generation backend speaking the `OpenAI` chat completions wire format
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: GenerationConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a new backend client from configuration
    ///
    /// The connection pool is sized to the admission gate capacity, so every
    /// concurrently admitted request can hold a warm connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: GenerationConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_capacity)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn convert_messages(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
        messages.iter().map(OpenAiMessage::from).collect()
    }

    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("Bearer {api_key}"))
        } else {
            request
        }
    }

    fn connect_error(&self, e: &reqwest::Error) -> AppError {
        error!("Failed to reach generation backend: {e}");
        if e.is_connect() {
            AppError::external_service(
                "generation",
                format!(
                    "Cannot connect to generation backend at {}",
                    self.config.base_url
                ),
            )
        } else if e.is_timeout() {
            AppError::external_service("generation", "Generation backend request timed out")
        } else {
            AppError::external_service("generation", format!("Failed to connect: {e}"))
        }
    }

    /// Map backend error responses onto the service error taxonomy
    fn parse_error_response(status: reqwest::StatusCode, body: &str) -> AppError {
        if let Ok(error_response) = serde_json::from_str::<OpenAiErrorResponse>(body) {
            let error_type = error_response
                .error
                .error_type
                .unwrap_or_else(|| "unknown".to_owned());

            match status.as_u16() {
                401 | 403 => AppError::config(format!(
                    "Generation backend rejected credentials: {}",
                    error_response.error.message
                )),
                // Backend rate limiting is transient, clients may retry
                429 => AppError::overloaded(format!(
                    "Generation backend rate limit: {}",
                    error_response.error.message
                )),
                400 => AppError::external_service(
                    "generation",
                    format!("Backend rejected request: {}", error_response.error.message),
                ),
                _ => AppError::external_service(
                    "generation",
                    format!("{} - {}", error_type, error_response.error.message),
                ),
            }
        } else {
            AppError::external_service(
                "generation",
                format!(
                    "API error ({}): {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            )
        }
    }
}

#[async_trait]
impl GenerationProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.config.model)))]
    async fn complete(&self, request: &ChatRequest) -> Result<CompletionOutcome, AppError> {
        let model = request.model.as_deref().unwrap_or(&self.config.model);

        let openai_request = OpenAiRequest {
            model: model.to_owned(),
            messages: Self::convert_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(false),
        };

        let http_request = self
            .client
            .post(self.api_url("chat/completions"))
            .header("Content-Type", "application/json")
            .json(&openai_request);

        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| self.connect_error(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!("Failed to read API response: {e}");
            AppError::external_service("generation", format!("Failed to read response: {e}"))
        })?;

        if !status.is_success() {
            return Err(Self::parse_error_response(status, &body));
        }

        let openai_response: OpenAiResponse = serde_json::from_str(&body).map_err(|e| {
            error!(
                "Failed to parse API response: {e} - body: {}",
                body.chars().take(500).collect::<String>()
            );
            AppError::malformed_response("generation", format!("Failed to parse backend response: {e}"))
        })?;

        let choice = openai_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::malformed_response("generation", "API returned no choices"))?;

        let content = choice.message.content.unwrap_or_default();

        debug!(
            chars = content.len(),
            finish_reason = ?choice.finish_reason,
            "Received generation response"
        );

        if content.trim().is_empty() {
            return Ok(CompletionOutcome::Empty);
        }

        Ok(CompletionOutcome::Success(ChatResponse {
            content,
            model: openai_response.model,
            usage: openai_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt,
                completion_tokens: u.completion,
                total_tokens: u.total,
            }),
            finish_reason: choice.finish_reason,
        }))
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.config.model)))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let model = request.model.as_deref().unwrap_or(&self.config.model);

        let openai_request = OpenAiRequest {
            model: model.to_owned(),
            messages: Self::convert_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(true),
        };

        let http_request = self
            .client
            .post(self.api_url("chat/completions"))
            .header("Content-Type", "application/json")
            .json(&openai_request);

        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| self.connect_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error_response(status, &body));
        }

        let stream = create_sse_stream(
            response.bytes_stream(),
            |json_str| match serde_json::from_str::<OpenAiStreamChunk>(json_str) {
                Ok(chunk) => chunk.choices.into_iter().next().map(|choice| {
                    let delta = choice.delta.content.unwrap_or_default();
                    let is_final = choice.finish_reason.is_some();
                    Ok(StreamChunk {
                        delta,
                        is_final,
                        finish_reason: choice.finish_reason,
                    })
                }),
                Err(e) => {
                    warn!("Failed to parse stream chunk: {e}");
                    None
                }
            },
            "generation",
        );

        Ok(stream)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool, AppError> {
        debug!("Checking generation backend at {}", self.config.base_url);

        let http_request = self.client.get(self.api_url("models"));

        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| self.connect_error(&e))?;

        let healthy = response.status().is_success();
        if !healthy {
            warn!(
                "Generation backend health check failed with status: {}",
                response.status()
            );
        }

        Ok(healthy)
    }
}
