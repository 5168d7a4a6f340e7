//! Serper.dev Google search API.

use super::{attach_extras, http_client, map_reqwest_error, status_error, SearchProvider, SearchResult};
use crate::error::SearchError;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default Serper endpoint
pub const SERPER_URL: &str = "https://google.serper.dev/search";

/// Serper search provider
pub struct SerperProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    country: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for SerperProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerperProvider")
            .field("endpoint", &self.endpoint)
            .field("country", &self.country)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl SerperProvider {
    /// Create a provider against the public endpoint.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::MissingApiKey` if the key is empty.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SearchError::MissingApiKey("serper".into()));
        }
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            endpoint: SERPER_URL.to_string(),
            country: None,
            timeout,
        })
    }

    /// Override the endpoint URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Restrict results to a country code (Serper's `gl` parameter).
    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<OrganicHit>,
    knowledge_graph: Option<KnowledgeGraph>,
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    related_searches: Vec<RelatedSearch>,
}

#[derive(Debug, Deserialize)]
struct OrganicHit {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    snippet: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeGraph {
    title: Option<String>,
    website: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AnswerBox {
    answer: Option<String>,
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelatedSearch {
    query: String,
}

fn join_nonempty(parts: impl IntoIterator<Item = String>) -> String {
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Normalize a Serper response body.
///
/// The knowledge graph becomes a regular hit appended after organic results
/// when it carries a link. The answer box becomes the direct answer and
/// related searches become follow-up hints.
fn parse_response(body: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
    let response: SerperResponse = serde_json::from_str(body)
        .map_err(|e| SearchError::ResponseProcessing(format!("Malformed Serper response: {}", e)))?;

    let mut results: Vec<SearchResult> = response
        .organic
        .into_iter()
        .filter(|hit| !hit.link.trim().is_empty())
        .map(|hit| {
            let content = join_nonempty(hit.snippet.into_iter().chain(hit.description));
            SearchResult::new(hit.link, hit.title, content)
        })
        .collect();

    if let Some(kg) = response.knowledge_graph {
        if let Some(url) = kg.website.or(kg.link).filter(|u| !u.trim().is_empty()) {
            let attributes = kg
                .attributes
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n");
            let content = join_nonempty(kg.description.into_iter().chain([attributes]));
            results.push(SearchResult::new(
                url,
                kg.title.unwrap_or_else(|| "Knowledge Graph Result".to_string()),
                content,
            ));
        }
    }

    results.truncate(max_results);

    let direct_answer = response.answer_box.and_then(|ab| ab.answer.or(ab.snippet));
    let follow_ups = response
        .related_searches
        .into_iter()
        .map(|r| r.query)
        .collect();
    attach_extras(&mut results, direct_answer, follow_ups);

    Ok(results)
}

#[async_trait]
impl SearchProvider for SerperProvider {
    fn name(&self) -> &str {
        "serper"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidInput("Query cannot be empty".into()));
        }
        log::debug!("Searching Serper: {}", query);

        let mut payload = json!({ "q": query, "num": max_results });
        if let Some(ref country) = self.country {
            payload["gl"] = json!(country);
        }

        let response = self
            .http
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&payload)
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
        "organic": [
            {"title": "Rust", "link": "https://www.rust-lang.org/", "snippet": "A language empowering everyone"},
            {"title": "Wiki", "link": "https://en.wikipedia.org/wiki/Rust", "snippet": "Rust is", "description": "multi-paradigm"},
            {"title": "Broken", "snippet": "no link"}
        ],
        "knowledgeGraph": {
            "title": "Rust",
            "website": "https://rust-lang.org",
            "description": "Programming language",
            "attributes": {"Designed by": "Graydon Hoare", "First appeared": "2015"}
        },
        "answerBox": {"snippet": "Rust is a systems language."},
        "relatedSearches": [{"query": "rust vs go"}, {"query": "rust async"}]
    }"#;

    #[test]
    fn test_parse_response_normalizes() {
        let results = parse_response(SAMPLE, 10).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[1].content, "Rust is\n\nmulti-paradigm");
        assert_eq!(results[2].url, "https://rust-lang.org");
        assert!(results[2].content.contains("Designed by: Graydon Hoare"));
        assert_eq!(
            results[0].direct_answer.as_deref(),
            Some("Rust is a systems language.")
        );
        assert_eq!(
            results[0].follow_up_questions,
            vec!["rust vs go".to_string(), "rust async".to_string()]
        );
    }

    #[test]
    fn test_parse_response_respects_cap() {
        let results = parse_response(SAMPLE, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].url, "https://en.wikipedia.org/wiki/Rust");
    }

    #[test]
    fn test_parse_response_malformed() {
        assert!(matches!(
            parse_response("not json", 3),
            Err(SearchError::ResponseProcessing(_))
        ));
    }

    #[tokio::test]
    #[ignore] // Requires SERPER_API_KEY
    async fn test_live_search() {
        let key = std::env::var("SERPER_API_KEY").expect("SERPER_API_KEY not set");
        let provider = SerperProvider::new(key, Duration::from_secs(30)).unwrap();
        let results = provider.search("rust programming language", 3).await.unwrap();
        assert!(!results.is_empty());
    }
}
