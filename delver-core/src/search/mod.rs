//! Web search providers.
//!
//! Every provider normalizes its wire format into one [`SearchResult`] shape.
//! Provider-specific extras (direct answers, follow-up hints, scores) become
//! optional fields and never drive control flow.

mod serper;
mod tavily;

pub use serper::SerperProvider;
pub use tavily::TavilyProvider;

use crate::error::SearchError;
use crate::utils::truncate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// One ranked search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Source identifier
    pub url: String,

    /// Page title
    pub title: String,

    /// Snippet or extracted page text
    pub content: String,

    /// Provider relevance score, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Provider-suggested follow-up questions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_up_questions: Vec<String>,

    /// Provider-supplied direct answer to the query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_answer: Option<String>,
}

impl SearchResult {
    /// Create a result with no provider extras.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            score: None,
            follow_up_questions: Vec::new(),
            direct_answer: None,
        }
    }

    /// Attach a relevance score.
    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Attach provider extras to the top-ranked result.
pub(crate) fn attach_extras(
    results: &mut [SearchResult],
    direct_answer: Option<String>,
    follow_ups: Vec<String>,
) {
    if let Some(first) = results.first_mut() {
        first.direct_answer = direct_answer.filter(|a| !a.trim().is_empty());
        first.follow_up_questions = follow_ups
            .into_iter()
            .filter(|q| !q.trim().is_empty())
            .collect();
    }
}

/// Which search backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Tavily,
    #[default]
    Serper,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSource::Tavily => "tavily",
            SearchSource::Serper => "serper",
        }
    }
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchSource {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tavily" => Ok(SearchSource::Tavily),
            "serper" => Ok(SearchSource::Serper),
            other => Err(SearchError::UnknownSource(other.to_string())),
        }
    }
}

/// A web search backend
///
/// Implementations must be safe to call concurrently for different queries.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run one query, returning at most `max_results` hits in rank order.
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchResult>, SearchError>;
}

/// Providers keyed by [`SearchSource`]
#[derive(Clone, Default)]
pub struct SearchRegistry {
    providers: HashMap<SearchSource, Arc<dyn SearchProvider>>,
}

impl fmt::Debug for SearchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}

impl SearchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the provider for a source.
    #[must_use]
    pub fn with_provider(mut self, source: SearchSource, provider: Arc<dyn SearchProvider>) -> Self {
        self.register(source, provider);
        self
    }

    /// Register (or replace) the provider for a source.
    pub fn register(&mut self, source: SearchSource, provider: Arc<dyn SearchProvider>) {
        if self.providers.insert(source, provider).is_some() {
            log::debug!("Replaced search provider for {}", source);
        }
    }

    /// Look up the provider for a source.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::UnknownSource` if nothing is registered for it.
    pub fn get(&self, source: SearchSource) -> Result<Arc<dyn SearchProvider>, SearchError> {
        self.providers
            .get(&source)
            .cloned()
            .ok_or_else(|| SearchError::UnknownSource(source.to_string()))
    }

    /// Registered sources, sorted by name.
    pub fn sources(&self) -> Vec<SearchSource> {
        let mut sources: Vec<_> = self.providers.keys().copied().collect();
        sources.sort_by_key(|s| s.as_str());
        sources
    }
}

/// Build the shared HTTP client used by providers and the fetcher.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, SearchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("delver/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SearchError::Network(format!("Failed to build HTTP client: {}", e)))
}

pub(crate) fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> SearchError {
    if error.is_timeout() {
        SearchError::Timeout(timeout.as_millis() as u64)
    } else if error.is_decode() {
        SearchError::ResponseProcessing(error.to_string())
    } else {
        SearchError::Network(error.to_string())
    }
}

/// Classify a non-success HTTP status from a provider.
pub(crate) fn status_error(status: u16, body: &str) -> SearchError {
    let message = truncate(body, 300);
    match status {
        401 | 403 => SearchError::Auth(message),
        429 => SearchError::RateLimit(message),
        _ => SearchError::Http { status, message },
    }
}
