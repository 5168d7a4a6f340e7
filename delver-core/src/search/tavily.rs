//! Tavily search API.

use super::{attach_extras, http_client, map_reqwest_error, status_error, SearchProvider, SearchResult};
use crate::error::SearchError;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Default Tavily endpoint
pub const TAVILY_URL: &str = "https://api.tavily.com/search";

/// Tavily search provider
pub struct TavilyProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    timeout: Duration,
}

impl std::fmt::Debug for TavilyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilyProvider")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl TavilyProvider {
    /// Create a provider against the public endpoint.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::MissingApiKey` if the key is empty.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SearchError::MissingApiKey("tavily".into()));
        }
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            endpoint: TAVILY_URL.to_string(),
            timeout,
        })
    }

    /// Override the endpoint URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
    answer: Option<String>,
    #[serde(default)]
    follow_up_questions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TavilyHit {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: Option<String>,
    score: Option<f64>,
}

/// Normalize a Tavily response body.
fn parse_response(body: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
    let response: TavilyResponse = serde_json::from_str(body)
        .map_err(|e| SearchError::ResponseProcessing(format!("Malformed Tavily response: {}", e)))?;

    let mut results: Vec<SearchResult> = response
        .results
        .into_iter()
        .filter(|hit| !hit.url.trim().is_empty())
        .take(max_results)
        .map(|hit| SearchResult {
            url: hit.url,
            title: hit.title,
            content: hit.content.unwrap_or_default(),
            score: hit.score,
            follow_up_questions: Vec::new(),
            direct_answer: None,
        })
        .collect();

    attach_extras(
        &mut results,
        response.answer,
        response.follow_up_questions.unwrap_or_default(),
    );
    Ok(results)
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidInput("Query cannot be empty".into()));
        }
        log::debug!("Searching Tavily: {}", query);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "query": query,
                "max_results": max_results,
                "include_answer": true,
            }))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }

        parse_response(&body, max_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "query": "good",
        "follow_up_questions": ["What is goodness?"],
        "answer": "Good means of high quality.",
        "images": [],
        "results": [
            {"title": "GOOD Definition", "url": "https://www.merriam-webster.com/dictionary/good",
             "content": "good a good many of us", "score": 0.73, "raw_content": null},
            {"title": "No link", "url": "", "content": "dropped"},
            {"title": "Second", "url": "https://example.com/good", "content": null}
        ],
        "response_time": 1.38
    }"#;

    #[test]
    fn test_parse_response_normalizes() {
        let results = parse_response(SAMPLE, 5).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].score, Some(0.73));
        assert_eq!(
            results[0].direct_answer.as_deref(),
            Some("Good means of high quality.")
        );
        assert_eq!(results[0].follow_up_questions.len(), 1);
        assert_eq!(results[1].content, "");
        assert!(results[1].direct_answer.is_none());
    }

    #[test]
    fn test_parse_response_respects_cap() {
        let results = parse_response(SAMPLE, 1).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_parse_response_empty() {
        let results = parse_response(r#"{"results": [], "answer": null}"#, 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_missing_api_key() {
        let result = TavilyProvider::new("", Duration::from_secs(1));
        assert!(matches!(result, Err(SearchError::MissingApiKey(_))));
    }

    #[tokio::test]
    #[ignore] // Requires TAVILY_API_KEY
    async fn test_live_search() {
        let key = std::env::var("TAVILY_API_KEY").expect("TAVILY_API_KEY not set");
        let provider = TavilyProvider::new(key, Duration::from_secs(30)).unwrap();
        let results = provider.search("rust programming language", 3).await.unwrap();
        assert!(!results.is_empty());
    }
}
