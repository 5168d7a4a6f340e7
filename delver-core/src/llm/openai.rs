//! OpenAI-compatible chat completions backend.
//!
//! Works against any server exposing `POST {base_url}/chat/completions`
//! with the OpenAI request/response shape.

use super::client::LlmBackend;
use super::request::{LlmRequest, LlmResponse};
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::utils::truncate;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Backend speaking the OpenAI chat completions protocol
pub struct OpenAiBackend {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiBackend {
    /// Create a backend for the default OpenAI endpoint.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::InvalidRequest` if the API key is empty, or
    /// `LlmError::Other` if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::InvalidRequest("API key cannot be empty".into()));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the backend at a different OpenAI-compatible server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Build the JSON request body for a chat completion.
fn build_body(request: &LlmRequest, config: &LlmConfig) -> serde_json::Value {
    let mut system = request.system_instruction.clone().unwrap_or_default();
    if let Some(ref schema) = request.response_format {
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str("Respond with a single JSON object matching this JSON schema:\n");
        system.push_str(&schema.to_string());
    }

    let mut messages = Vec::with_capacity(2);
    if !system.is_empty() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": request.prompt }));

    let mut body = json!({
        "model": config.model,
        "messages": messages,
        "temperature": request.temperature.unwrap_or(config.temperature),
        "max_tokens": config.max_tokens,
    });
    if request.response_format.is_some() {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

/// Classify a non-success HTTP status.
fn status_error(status: u16, body: &str) -> LlmError {
    let message = truncate(body, 300);
    match status {
        401 | 403 => LlmError::Auth(message),
        429 => LlmError::RateLimit(message),
        500..=599 => LlmError::Http { status, message },
        _ => LlmError::InvalidRequest(format!("HTTP {}: {}", status, message)),
    }
}

fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout(timeout.as_millis() as u64)
    } else if error.is_decode() {
        LlmError::ResponseProcessing(error.to_string())
    } else if error.is_connect() || error.is_request() || error.is_body() {
        LlmError::Network(error.to_string())
    } else {
        LlmError::Other(error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<u32>,
}

fn parse_completion(body: &str) -> Result<LlmResponse, LlmError> {
    let completion: ChatCompletion = serde_json::from_str(body)
        .map_err(|e| LlmError::ResponseProcessing(format!("Malformed completion: {}", e)))?;

    let text = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or(LlmError::NoContent)?;

    Ok(LlmResponse {
        text,
        total_tokens: completion.usage.and_then(|u| u.total_tokens),
    })
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        request: &LlmRequest,
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(config.timeout)
            .json(&build_body(request, config))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, config.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, config.timeout))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }

        parse_completion(&body)
    }
}
