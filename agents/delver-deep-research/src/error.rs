use delver_core::{LlmError, SearchError};
use thiserror::Error;

/// Errors surfaced by a research run
///
/// Only configuration problems, cancellation and synthesis failures escape a
/// run. Planning, search and extraction failures stay local to their node.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResearchError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid research request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The run was cancelled before any learnings were gathered
    #[error("Research cancelled")]
    Cancelled,

    /// Final report or answer could not be produced
    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Text-generation failure inside one pipeline step
    #[error("LLM error: {0}")]
    Llm(LlmError),

    /// Search or fetch failure inside one pipeline step
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<LlmError> for ResearchError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::Cancelled => ResearchError::Cancelled,
            other => ResearchError::Llm(other),
        }
    }
}

impl ResearchError {
    /// Check if this error came from cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ResearchError::Cancelled | ResearchError::Search(SearchError::Cancelled)
        )
    }

    /// Check if the underlying failure was transient (timeout, rate limit, network).
    pub fn is_transient(&self) -> bool {
        match self {
            ResearchError::Llm(e) => e.is_retryable(),
            ResearchError::Search(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_llm_cancelled_maps_to_cancelled() {
        let err: ResearchError = LlmError::Cancelled.into();
        assert!(matches!(err, ResearchError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[rstest]
    #[case::llm_timeout(ResearchError::from(LlmError::Timeout(10)), true)]
    #[case::llm_auth(ResearchError::from(LlmError::Auth("key".into())), false)]
    #[case::search_rate_limit(ResearchError::from(SearchError::RateLimit("429".into())), true)]
    #[case::synthesis(ResearchError::SynthesisFailed("empty".into()), false)]
    fn test_is_transient(#[case] error: ResearchError, #[case] expected: bool) {
        assert_eq!(error.is_transient(), expected);
    }

    #[test]
    fn test_display() {
        let err = ResearchError::SynthesisFailed("Empty synthesis response".into());
        assert_eq!(err.to_string(), "Synthesis failed: Empty synthesis response");
    }
}
