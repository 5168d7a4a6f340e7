//! Bounded-concurrency search execution.

use crate::limiter::CallLimiter;
use crate::state::SharedState;
use crate::types::SearchQuery;
use delver_core::{ContentFetcher, SearchConfig, SearchError, SearchProvider, SearchResult};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Results of one planned query
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub query: SearchQuery,
    /// Results whose sources were not visited before this run claimed them
    pub results: Vec<SearchResult>,
    /// Why the search failed, if it did
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs queries through one search provider under the run-wide limiter
#[derive(Clone)]
pub struct SearchExecutor {
    provider: Arc<dyn SearchProvider>,
    fetcher: Option<Arc<dyn ContentFetcher>>,
    limiter: CallLimiter,
    config: SearchConfig,
    /// Snippets shorter than this many chars get full page text
    fetch_min_chars: Option<usize>,
}

impl std::fmt::Debug for SearchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchExecutor")
            .field("provider", &self.provider.name())
            .field("fetch", &self.fetch_min_chars)
            .field("config", &self.config)
            .finish()
    }
}

impl SearchExecutor {
    pub fn new(provider: Arc<dyn SearchProvider>, limiter: CallLimiter, config: SearchConfig) -> Self {
        Self {
            provider,
            fetcher: None,
            limiter,
            config,
            fetch_min_chars: None,
        }
    }

    /// Enrich results whose snippet is shorter than `min_chars` with fetched page text.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>, min_chars: usize) -> Self {
        self.fetcher = Some(fetcher);
        self.fetch_min_chars = Some(min_chars);
        self
    }

    /// Run every query concurrently, returning outcomes in input order.
    ///
    /// No query's failure affects another: a failed or timed-out query yields
    /// an outcome with zero results and the error recorded. Results are
    /// filtered against, and registered in, the run's visited sources.
    pub async fn execute(
        &self,
        queries: Vec<SearchQuery>,
        state: &SharedState,
        token: &CancellationToken,
    ) -> Vec<QueryOutcome> {
        join_all(
            queries
                .into_iter()
                .map(|query| self.run_query(query, state, token)),
        )
        .await
    }

    async fn run_query(
        &self,
        query: SearchQuery,
        state: &SharedState,
        token: &CancellationToken,
    ) -> QueryOutcome {
        match self.search_with_retry(&query.query, token).await {
            Ok(results) => {
                let fresh = state.claim_sources(results);
                log::debug!("Query '{}' produced {} new results", query.query, fresh.len());
                let results = self.enrich(fresh, token).await;
                QueryOutcome {
                    query,
                    results,
                    error: None,
                }
            }
            Err(e) => {
                if !matches!(e, SearchError::Cancelled) {
                    log::warn!("Search for '{}' failed: {}", query.query, e);
                }
                QueryOutcome {
                    query,
                    results: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn search_with_retry(
        &self,
        query: &str,
        token: &CancellationToken,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let max_retries = self.config.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match self.search_once(query, token).await {
                Ok(mut results) => {
                    results.truncate(self.config.max_results_per_query);
                    return Ok(results);
                }
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    log::warn!(
                        "Search '{}' failed (attempt {}/{}): {}, retrying...",
                        query,
                        attempt + 1,
                        max_retries + 1,
                        e
                    );
                    last_error = Some(e);

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(SearchError::Cancelled),
                        _ = tokio::time::sleep(self.config.retry_delay(attempt)) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(SearchError::Cancelled))
    }

    /// One provider call holding a limiter slot, under the per-call timeout.
    async fn search_once(
        &self,
        query: &str,
        token: &CancellationToken,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let _permit = self
            .limiter
            .acquire(token)
            .await
            .ok_or(SearchError::Cancelled)?;
        let timeout = self.config.timeout;

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SearchError::Cancelled),
            result = tokio::time::timeout(
                timeout,
                self.provider.search(query, self.config.max_results_per_query),
            ) => result.unwrap_or_else(|_| Err(SearchError::Timeout(timeout.as_millis() as u64))),
        }
    }

    async fn enrich(&self, results: Vec<SearchResult>, token: &CancellationToken) -> Vec<SearchResult> {
        let (Some(fetcher), Some(min_chars)) = (&self.fetcher, self.fetch_min_chars) else {
            return results;
        };

        join_all(results.into_iter().map(|mut result| async move {
            if result.content.chars().count() >= min_chars {
                return result;
            }
            let Some(_permit) = self.limiter.acquire(token).await else {
                return result;
            };
            match tokio::time::timeout(self.config.timeout, fetcher.fetch(&result.url)).await {
                Ok(Ok(text)) if !text.trim().is_empty() => result.content = text,
                Ok(Ok(_)) => log::debug!("Fetched empty page for {}", result.url),
                Ok(Err(e)) => log::debug!("Fetch failed for {}, keeping snippet: {}", result.url, e),
                Err(_) => log::debug!("Fetch timed out for {}, keeping snippet", result.url),
            }
            result
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delver_core::mock::{CallCounter, MockFetcher, MockSearch};
    use std::time::Duration;

    fn queries(texts: &[&str]) -> Vec<SearchQuery> {
        texts.iter().map(|t| SearchQuery::new(*t, "")).collect()
    }

    fn fast_config() -> SearchConfig {
        SearchConfig::default()
            .with_timeout(Duration::from_millis(100))
            .with_max_retries(0)
            .with_retry_base_delay_ms(1)
    }

    #[tokio::test]
    async fn test_outcomes_keep_input_order() {
        let search = MockSearch::new().with_delay_for("first", Duration::from_millis(20));
        let executor = SearchExecutor::new(Arc::new(search), CallLimiter::new(3), fast_config());

        let outcomes = executor
            .execute(queries(&["first", "second"]), &SharedState::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcomes[0].query.query, "first");
        assert_eq!(outcomes[1].query.query, "second");
        assert!(outcomes.iter().all(|o| o.results.len() == 2));
    }

    #[tokio::test]
    async fn test_timeout_fails_only_that_query() {
        let search = MockSearch::new().with_delay_for("slow", Duration::from_secs(5));
        let executor = SearchExecutor::new(Arc::new(search), CallLimiter::new(3), fast_config());

        let outcomes = executor
            .execute(queries(&["slow", "fast"]), &SharedState::new(), &CancellationToken::new())
            .await;

        assert!(outcomes[0].failed());
        assert!(outcomes[0].results.is_empty());
        assert!(outcomes[0].error.as_deref().unwrap().contains("timed out"));
        assert!(!outcomes[1].failed());
        assert_eq!(outcomes[1].results.len(), 2);
    }

    #[tokio::test]
    async fn test_visited_sources_are_filtered() {
        let search = MockSearch::with_responder(|_, _| {
            Ok(vec![
                SearchResult::new("https://same.com/page", "t", "c"),
                SearchResult::new("https://other.com", "t", "c"),
            ])
        });
        let state = SharedState::new();
        state.claim_sources(vec![SearchResult::new("https://other.com/", "", "")]);
        let executor = SearchExecutor::new(Arc::new(search), CallLimiter::new(1), fast_config());

        let outcomes = executor
            .execute(queries(&["a", "b"]), &state, &CancellationToken::new())
            .await;

        let total: usize = outcomes.iter().map(|o| o.results.len()).sum();
        assert_eq!(total, 1);
        assert_eq!(state.source_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let counter = CallCounter::new();
        let search = MockSearch::new()
            .with_latency(Duration::from_millis(10))
            .with_counter(counter.clone());
        let executor = SearchExecutor::new(Arc::new(search), CallLimiter::new(2), fast_config());

        executor
            .execute(
                queries(&["a", "b", "c", "d", "e", "f"]),
                &SharedState::new(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(counter.total(), 6);
        assert!(counter.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_transient_error_retried() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let search = MockSearch::with_responder(move |query, _| {
            if seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(SearchError::RateLimit("429".into()))
            } else {
                Ok(vec![SearchResult::new(format!("https://r.com/{}", query), "t", "c")])
            }
        });
        let executor = SearchExecutor::new(
            Arc::new(search),
            CallLimiter::new(1),
            fast_config().with_max_retries(1),
        );

        let outcomes = executor
            .execute(queries(&["q"]), &SharedState::new(), &CancellationToken::new())
            .await;

        assert!(!outcomes[0].failed());
        assert_eq!(outcomes[0].results.len(), 1);
    }

    #[tokio::test]
    async fn test_definitive_error_not_retried() {
        let search = MockSearch::with_responder(|_, _| Err(SearchError::Auth("bad key".into())));
        let executor = SearchExecutor::new(
            Arc::new(search.clone()),
            CallLimiter::new(1),
            fast_config().with_max_retries(3),
        );

        let outcomes = executor
            .execute(queries(&["q"]), &SharedState::new(), &CancellationToken::new())
            .await;

        assert!(outcomes[0].failed());
        assert_eq!(search.query_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_issues_no_searches() {
        let search = MockSearch::new();
        let executor =
            SearchExecutor::new(Arc::new(search.clone()), CallLimiter::new(1), fast_config());
        let token = CancellationToken::new();
        token.cancel();

        let outcomes = executor
            .execute(queries(&["a", "b"]), &SharedState::new(), &token)
            .await;

        assert!(outcomes.iter().all(QueryOutcome::failed));
        assert_eq!(search.query_count(), 0);
    }

    #[tokio::test]
    async fn test_short_snippets_enriched() {
        let search = MockSearch::with_responder(|_, _| {
            Ok(vec![
                SearchResult::new("https://short.com", "t", "tiny"),
                SearchResult::new("https://long.com", "t", "x".repeat(50)),
                SearchResult::new("https://broken.com", "t", "kept"),
            ])
        });
        let fetcher = MockFetcher::new(|url| {
            if url.contains("broken") {
                Err(SearchError::Network("reset".into()))
            } else {
                Ok(format!("full text of {}", url))
            }
        });
        let executor = SearchExecutor::new(Arc::new(search), CallLimiter::new(2), fast_config())
            .with_fetcher(Arc::new(fetcher.clone()), 20);

        let outcomes = executor
            .execute(queries(&["q"]), &SharedState::new(), &CancellationToken::new())
            .await;

        let results = &outcomes[0].results;
        assert_eq!(results[0].content, "full text of https://short.com");
        assert_eq!(results[1].content, "x".repeat(50));
        assert_eq!(results[2].content, "kept");
        assert_eq!(fetcher.fetch_count(), 2);
    }
}
