use std::time::Duration;

/// Default model for the OpenAI-compatible backend
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Upper bound on any single backoff delay
const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// Exponential backoff: delay = base_delay * 2^attempt, capped at 60 seconds.
fn backoff(base_delay_ms: u64, attempt: u32) -> Duration {
    let delay_ms = base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_RETRY_DELAY_MS);

    Duration::from_millis(delay_ms)
}

/// Configuration for the LLM client
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct LlmConfig {
    /// Model identifier passed to the backend
    ///
    /// Default: [`DEFAULT_MODEL`]
    pub model: String,

    /// Maximum tokens per request
    ///
    /// Default: 4096
    pub max_tokens: u32,

    /// Timeout for individual LLM requests
    ///
    /// Applied per attempt, not to the whole retry loop.
    /// Default: 60 seconds
    pub timeout: Duration,

    /// Temperature for generation (0.0 - 1.0)
    ///
    /// Default: 0.7
    pub temperature: f32,

    /// Maximum number of retries on transient failures
    ///
    /// Default: 2
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    ///
    /// Default: 1000ms
    pub retry_base_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            timeout: Duration::from_secs(60),
            temperature: 0.7,
            max_retries: 2,
            retry_base_delay_ms: 1000,
        }
    }
}

impl LlmConfig {
    /// Set the model identifier.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the maximum tokens per request.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the timeout for individual LLM requests.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the temperature for generation (0.0 - 1.0).
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the maximum number of retries on transient failures.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff (milliseconds).
    #[must_use]
    pub fn with_retry_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_base_delay_ms = delay_ms;
        self
    }

    /// Get the retry delay for a given attempt number (0-indexed)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        backoff(self.retry_base_delay_ms, attempt)
    }
}

/// Configuration for search provider calls
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SearchConfig {
    /// Timeout for a single provider call
    ///
    /// A timed-out call counts as that query's failure.
    /// Default: 30 seconds
    pub timeout: Duration,

    /// Maximum results kept per query
    ///
    /// Default: 5
    pub max_results_per_query: usize,

    /// Maximum number of retries on transient provider failures
    ///
    /// Default: 1
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    ///
    /// Default: 500ms
    pub retry_base_delay_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_results_per_query: 5,
            max_retries: 1,
            retry_base_delay_ms: 500,
        }
    }
}

impl SearchConfig {
    /// Set the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-query result cap.
    #[must_use]
    pub fn with_max_results_per_query(mut self, max_results: usize) -> Self {
        self.max_results_per_query = max_results;
        self
    }

    /// Set the maximum number of retries on transient failures.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff (milliseconds).
    #[must_use]
    pub fn with_retry_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_base_delay_ms = delay_ms;
        self
    }

    /// Get the retry delay for a given attempt number (0-indexed)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        backoff(self.retry_base_delay_ms, attempt)
    }
}
