use thiserror::Error;

/// Top-level error type for the delver library
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DelverError {
    /// Error from the LLM client
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Error from a search provider or content fetcher
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors that can occur in the LLM client
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LlmError {
    /// Request timed out
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Transport-level failure (connection reset, DNS, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status from the generation service
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Credentials rejected or quota exhausted
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response processing error (including structured output that does not
    /// match the requested schema)
    #[error("Failed to process response: {0}")]
    ResponseProcessing(String),

    /// No content in response
    #[error("No content in response")]
    NoContent,

    /// Request was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// Other LLM error
    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Check if this error is retryable.
    ///
    /// Returns `true` for transient errors that might succeed on retry:
    /// - Timeouts
    /// - Rate limits
    /// - Network failures
    /// - 5xx responses
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout(_) | LlmError::RateLimit(_) | LlmError::Network(_) => true,
            LlmError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this error is definitive (auth, quota, malformed request or schema).
    ///
    /// Cancellation is neither transient nor definitive.
    pub fn is_definitive(&self) -> bool {
        !self.is_retryable() && !matches!(self, LlmError::Cancelled)
    }
}

/// Errors that can occur while talking to a search provider or fetching content
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SearchError {
    /// Provider call timed out
    #[error("Search timed out after {0}ms")]
    Timeout(u64),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status from the provider
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Provider is not configured with an API key
    #[error("Missing API key for {0}")]
    MissingApiKey(String),

    /// Credentials rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Provider returned a body we could not interpret
    #[error("Failed to process response: {0}")]
    ResponseProcessing(String),

    /// No provider is registered for the requested source
    #[error("Unknown search source: {0}")]
    UnknownSource(String),

    /// Invalid input (empty query, malformed URL)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Call was cancelled
    #[error("Search cancelled")]
    Cancelled,
}

impl SearchError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Timeout(_) | SearchError::RateLimit(_) | SearchError::Network(_) => true,
            SearchError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SearchError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::timeout(LlmError::Timeout(5000), &["5000", "timed out"])]
    #[case::rate_limit(LlmError::RateLimit("slow down".into()), &["Rate limit", "slow down"])]
    #[case::http(LlmError::Http { status: 502, message: "bad gateway".into() }, &["502", "bad gateway"])]
    #[case::auth(LlmError::Auth("invalid key".into()), &["Authentication", "invalid key"])]
    #[case::cancelled(LlmError::Cancelled, &["cancelled"])]
    fn test_llm_error_display(#[case] error: LlmError, #[case] expected: &[&str]) {
        let display = error.to_string();
        for s in expected {
            assert!(display.contains(s), "Expected '{}' in '{}'", s, display);
        }
    }

    #[rstest]
    #[case::timeout(LlmError::Timeout(5000), true)]
    #[case::rate_limit(LlmError::RateLimit("quota".into()), true)]
    #[case::network(LlmError::Network("reset".into()), true)]
    #[case::server_error(LlmError::Http { status: 503, message: "unavailable".into() }, true)]
    #[case::client_error(LlmError::Http { status: 404, message: "not found".into() }, false)]
    #[case::auth(LlmError::Auth("bad key".into()), false)]
    #[case::schema(LlmError::ResponseProcessing("not json".into()), false)]
    #[case::cancelled(LlmError::Cancelled, false)]
    fn test_llm_is_retryable(#[case] error: LlmError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn test_cancelled_is_not_definitive() {
        assert!(!LlmError::Cancelled.is_definitive());
        assert!(LlmError::Auth("x".into()).is_definitive());
        assert!(!LlmError::Timeout(1).is_definitive());
    }

    #[rstest]
    #[case::timeout(SearchError::Timeout(100), true)]
    #[case::rate_limit(SearchError::RateLimit("429".into()), true)]
    #[case::server_error(SearchError::Http { status: 500, message: "boom".into() }, true)]
    #[case::missing_key(SearchError::MissingApiKey("tavily".into()), false)]
    #[case::unknown(SearchError::UnknownSource("bing".into()), false)]
    fn test_search_is_retryable(#[case] error: SearchError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn test_error_conversion() {
        let err: DelverError = LlmError::NoContent.into();
        assert!(matches!(err, DelverError::Llm(_)));

        let err: DelverError = SearchError::Cancelled.into();
        assert!(matches!(err, DelverError::Search(_)));
    }
}
