//! Deterministic test doubles for the external collaborators.
//!
//! Each double records the calls it received and reports how many calls were
//! in flight at once through a [`CallCounter`]. Share one counter across
//! several doubles to observe the total number of simultaneous external calls.
//!
//! # Example
//!
//! ```
//! use delver_core::mock::{CallCounter, MockLlm, MockSearch};
//!
//! let counter = CallCounter::new();
//! let llm = MockLlm::text("{}").with_counter(counter.clone());
//! let search = MockSearch::new().with_counter(counter.clone());
//! assert_eq!(counter.max_in_flight(), 0);
//! # let _ = (llm, search);
//! ```

use crate::config::LlmConfig;
use crate::error::{LlmError, SearchError};
use crate::fetch::ContentFetcher;
use crate::llm::{LlmBackend, LlmRequest, LlmResponse};
use crate::search::{SearchProvider, SearchResult};
use crate::utils::normalize_text;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mock lock poisoned - recovering");
            poisoned.into_inner()
        }
    }
}

/// Counts concurrent calls and remembers the high-water mark
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    inner: Arc<CounterInner>,
}

#[derive(Debug, Default)]
struct CounterInner {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    total: AtomicUsize,
}

/// Marks one call as in flight until dropped
#[derive(Debug)]
pub struct InFlight {
    inner: Arc<CounterInner>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call as started.
    pub fn enter(&self) -> InFlight {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.inner.total.fetch_add(1, Ordering::SeqCst);
        InFlight {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Calls started so far.
    pub fn total(&self) -> usize {
        self.inner.total.load(Ordering::SeqCst)
    }
}

type LlmResponder = dyn Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync;
type LlmErrorFactory = dyn Fn() -> LlmError + Send + Sync;

/// Scripted text-generation backend
///
/// Responses are produced by a closure over the request, so tests can route
/// on [`LlmRequest::label`] or on prompt contents.
#[derive(Clone)]
pub struct MockLlm {
    responder: Arc<LlmResponder>,
    latency: Duration,
    failures: Arc<Mutex<(usize, Option<Arc<LlmErrorFactory>>)>>,
    calls: Arc<Mutex<Vec<LlmRequest>>>,
    counter: CallCounter,
}

impl std::fmt::Debug for MockLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLlm")
            .field("latency", &self.latency)
            .field("calls", &self.call_count())
            .finish()
    }
}

impl MockLlm {
    /// Respond with the closure's output for every request.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            latency: Duration::ZERO,
            failures: Arc::new(Mutex::new((0, None))),
            calls: Arc::new(Mutex::new(Vec::new())),
            counter: CallCounter::new(),
        }
    }

    /// Respond with the same text for every request.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Sleep this long inside every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the first `n` calls with the produced error.
    #[must_use]
    pub fn fail_first<F>(self, n: usize, error: F) -> Self
    where
        F: Fn() -> LlmError + Send + Sync + 'static,
    {
        *lock(&self.failures) = (n, Some(Arc::new(error)));
        self
    }

    /// Report concurrency through a shared counter.
    #[must_use]
    pub fn with_counter(mut self, counter: CallCounter) -> Self {
        self.counter = counter;
        self
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of calls received with the given label.
    pub fn calls_with_label(&self, label: &str) -> usize {
        lock(&self.calls).iter().filter(|r| r.label == label).count()
    }

    /// Snapshot of every request received, in arrival order.
    pub fn calls(&self) -> Vec<LlmRequest> {
        lock(&self.calls).clone()
    }

    /// The concurrency instrument for this double.
    pub fn counter(&self) -> &CallCounter {
        &self.counter
    }

    fn take_failure(&self) -> Option<LlmError> {
        let mut failures = lock(&self.failures);
        if failures.0 == 0 {
            return None;
        }
        failures.0 -= 1;
        failures.1.as_ref().map(|make| make())
    }
}

#[async_trait]
impl LlmBackend for MockLlm {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        request: &LlmRequest,
        _config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let _in_flight = self.counter.enter();
        lock(&self.calls).push(request.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        (self.responder)(request).map(LlmResponse::new)
    }
}

type SearchResponder = dyn Fn(&str, usize) -> Result<Vec<SearchResult>, SearchError> + Send + Sync;

/// Scripted search provider
#[derive(Clone)]
pub struct MockSearch {
    responder: Arc<SearchResponder>,
    latency: Duration,
    delays: HashMap<String, Duration>,
    queries: Arc<Mutex<Vec<String>>>,
    counter: CallCounter,
}

impl std::fmt::Debug for MockSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSearch")
            .field("latency", &self.latency)
            .field("queries", &self.query_count())
            .finish()
    }
}

impl Default for MockSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSearch {
    /// Return synthetic results for every query.
    ///
    /// Each query yields two hits with URLs derived from the query text, so
    /// distinct queries produce distinct sources.
    pub fn new() -> Self {
        Self::with_responder(|query, max_results| {
            let slug = normalize_text(query).replace(' ', "-");
            Ok((0..max_results.min(2))
                .map(|i| {
                    SearchResult::new(
                        format!("https://example.com/{}/{}", slug, i),
                        format!("{} ({})", query, i),
                        format!("Content about {} number {}", query, i),
                    )
                })
                .collect())
        })
    }

    /// Produce results from a closure over `(query, max_results)`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, usize) -> Result<Vec<SearchResult>, SearchError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            latency: Duration::ZERO,
            delays: HashMap::new(),
            queries: Arc::new(Mutex::new(Vec::new())),
            counter: CallCounter::new(),
        }
    }

    /// Sleep this long inside every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sleep this long for one specific query (overrides the default latency).
    #[must_use]
    pub fn with_delay_for(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(normalize_text(query), delay);
        self
    }

    /// Report concurrency through a shared counter.
    #[must_use]
    pub fn with_counter(mut self, counter: CallCounter) -> Self {
        self.counter = counter;
        self
    }

    /// Number of searches received.
    pub fn query_count(&self) -> usize {
        lock(&self.queries).len()
    }

    /// Snapshot of every query received, in arrival order.
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }

    /// The concurrency instrument for this double.
    pub fn counter(&self) -> &CallCounter {
        &self.counter
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let _in_flight = self.counter.enter();
        lock(&self.queries).push(query.to_string());

        let delay = self
            .delays
            .get(&normalize_text(query))
            .copied()
            .unwrap_or(self.latency);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        (self.responder)(query, max_results)
    }
}

type FetchResponder = dyn Fn(&str) -> Result<String, SearchError> + Send + Sync;

/// Scripted content fetcher
#[derive(Clone)]
pub struct MockFetcher {
    responder: Arc<FetchResponder>,
    urls: Arc<Mutex<Vec<String>>>,
    counter: CallCounter,
}

impl std::fmt::Debug for MockFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFetcher")
            .field("fetches", &self.fetch_count())
            .finish()
    }
}

impl MockFetcher {
    /// Produce page text from a closure over the URL.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, SearchError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            urls: Arc::new(Mutex::new(Vec::new())),
            counter: CallCounter::new(),
        }
    }

    /// Report concurrency through a shared counter.
    #[must_use]
    pub fn with_counter(mut self, counter: CallCounter) -> Self {
        self.counter = counter;
        self
    }

    /// Number of fetches received.
    pub fn fetch_count(&self) -> usize {
        lock(&self.urls).len()
    }

    /// Snapshot of every URL fetched, in arrival order.
    pub fn urls(&self) -> Vec<String> {
        lock(&self.urls).clone()
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, SearchError> {
        let _in_flight = self.counter.enter();
        lock(&self.urls).push(url.to_string());
        tokio::task::yield_now().await;
        (self.responder)(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter_tracks_high_water() {
        let counter = CallCounter::new();
        let a = counter.enter();
        let b = counter.enter();
        assert_eq!(counter.in_flight(), 2);
        drop(a);
        drop(b);
        let _c = counter.enter();

        assert_eq!(counter.in_flight(), 1);
        assert_eq!(counter.max_in_flight(), 2);
        assert_eq!(counter.total(), 3);
    }

    #[tokio::test]
    async fn test_mock_llm_routes_by_label() {
        let mock = MockLlm::new(|req| match req.label.as_str() {
            "planning" => Ok("plan".into()),
            _ => Ok("other".into()),
        });
        let config = LlmConfig::default();

        let plan = mock
            .complete(&LlmRequest::new("x").with_label("planning"), &config)
            .await
            .unwrap();
        let other = mock.complete(&LlmRequest::new("y"), &config).await.unwrap();

        assert_eq!(plan.text, "plan");
        assert_eq!(other.text, "other");
        assert_eq!(mock.calls_with_label("planning"), 1);
    }

    #[tokio::test]
    async fn test_mock_search_synthetic_results() {
        let search = MockSearch::new();
        let results = search.search("Rust Async", 5).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://example.com/rust-async/0");
        assert_eq!(search.queries(), vec!["Rust Async".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_fetcher_records_urls() {
        let fetcher = MockFetcher::new(|url| Ok(format!("page {}", url)));
        let text = fetcher.fetch("https://a").await.unwrap();
        assert_eq!(text, "page https://a");
        assert_eq!(fetcher.fetch_count(), 1);
    }
}
