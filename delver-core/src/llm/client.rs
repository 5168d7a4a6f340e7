//! Retrying, cancellable LLM client over a pluggable backend.

use super::request::{LlmRequest, LlmResponse};
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::utils::{strip_code_fence, truncate_with_count};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A text-generation service reachable over some transport
///
/// Implementations perform exactly one attempt. Timeouts, retries and
/// cancellation are layered on top by [`LlmClient`].
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Execute a single completion request.
    async fn complete(
        &self,
        request: &LlmRequest,
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError>;
}

/// LLM client with timeout, retry and cancellation
///
/// Cheap to clone; clones share the backend.
///
/// # Example
///
/// ```no_run
/// use delver_core::{LlmClient, LlmConfig, LlmRequest, OpenAiBackend};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), delver_core::LlmError> {
/// let backend = OpenAiBackend::new("sk-...")?;
/// let client = LlmClient::new(Arc::new(backend), LlmConfig::default());
///
/// let response = client.generate(LlmRequest::new("What is the capital of France?")).await?;
/// println!("{}", response.text);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn LlmBackend>,
    config: LlmConfig,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl LlmClient {
    /// Create a new LLM client over the given backend.
    pub fn new(backend: Arc<dyn LlmBackend>, config: LlmConfig) -> Self {
        Self { backend, config }
    }

    /// Get a reference to the LLM configuration.
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Generate a complete response
    ///
    /// # Retry Behavior
    ///
    /// Transient failures (timeouts, rate limits, network errors, 5xx) are
    /// retried up to `config.max_retries` times with exponential backoff
    /// starting at `config.retry_base_delay_ms`.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `LlmError::InvalidRequest` if the prompt is empty
    /// - `LlmError::Timeout` if the last attempt exceeded `config.timeout`
    /// - `LlmError::NoContent` if the response is empty
    /// - any definitive backend error on first occurrence
    pub async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.validate_request(&request)?;

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.generate_once(&request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    log::warn!(
                        "LLM request '{}' failed (attempt {}/{}): {}, retrying...",
                        request.label,
                        attempt + 1,
                        self.config.max_retries + 1,
                        e
                    );
                    last_error = Some(e);
                    tokio::time::sleep(self.config.retry_delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Other("Retry loop exited unexpectedly".to_string())))
    }

    /// Generate a complete response with cancellation support
    ///
    /// Like [`generate`](Self::generate), but races every attempt and every
    /// backoff sleep against the token. Returns `LlmError::Cancelled` once the
    /// token fires.
    pub async fn generate_with_cancellation(
        &self,
        request: LlmRequest,
        cancellation_token: &CancellationToken,
    ) -> Result<LlmResponse, LlmError> {
        self.validate_request(&request)?;

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if cancellation_token.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    return Err(LlmError::Cancelled);
                }
                res = self.generate_once(&request) => res,
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    log::warn!(
                        "LLM request '{}' failed (attempt {}/{}): {}, retrying...",
                        request.label,
                        attempt + 1,
                        self.config.max_retries + 1,
                        e
                    );
                    last_error = Some(e);

                    tokio::select! {
                        biased;
                        _ = cancellation_token.cancelled() => {
                            return Err(LlmError::Cancelled);
                        }
                        _ = tokio::time::sleep(self.config.retry_delay(attempt)) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Other("Retry loop exited unexpectedly".to_string())))
    }

    /// Generate structured output and parse it into `T`
    ///
    /// The request should carry a schema via
    /// [`with_response_format`](LlmRequest::with_response_format). A response
    /// wrapped in a markdown code fence is accepted. A body that does not
    /// deserialize into `T` is a definitive `LlmError::ResponseProcessing`.
    pub async fn generate_json<T: DeserializeOwned>(
        &self,
        request: LlmRequest,
        cancellation_token: &CancellationToken,
    ) -> Result<T, LlmError> {
        let label = request.label.clone();
        let response = self
            .generate_with_cancellation(request, cancellation_token)
            .await?;

        serde_json::from_str(strip_code_fence(&response.text)).map_err(|e| {
            LlmError::ResponseProcessing(format!(
                "'{}' returned invalid JSON ({}): {}",
                label,
                e,
                truncate_with_count(&response.text, 200)
            ))
        })
    }

    /// Execute a single request under the configured timeout (no retries)
    async fn generate_once(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let timeout_duration = self.config.timeout;
        log::debug!(
            "LLM request '{}' via {} ({} prompt chars)",
            request.label,
            self.backend.name(),
            request.prompt.len()
        );

        let response = tokio::time::timeout(
            timeout_duration,
            self.backend.complete(request, &self.config),
        )
        .await
        .map_err(|_| LlmError::Timeout(timeout_duration.as_millis() as u64))??;

        if response.text.trim().is_empty() {
            return Err(LlmError::NoContent);
        }

        Ok(response)
    }

    /// Validate the request before processing
    fn validate_request(&self, request: &LlmRequest) -> Result<(), LlmError> {
        if request.prompt.trim().is_empty() {
            return Err(LlmError::InvalidRequest(
                "Prompt cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
