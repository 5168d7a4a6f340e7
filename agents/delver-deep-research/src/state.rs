//! Run-wide accumulator shared by every node task.
//!
//! All mutation goes through short critical sections on one mutex, so a
//! check-then-insert (query reservation, source claiming) is atomic with
//! respect to sibling nodes.

use crate::budget::{format_learning, CharEstimator, LengthEstimator};
use crate::dedup::{Deduplicator, LearningSet};
use crate::types::{Learning, RunStats, SearchQuery};
use delver_core::{normalize_text, SearchResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct ResearchState {
    issued: HashSet<String>,
    issued_order: Vec<String>,
    sources: Deduplicator,
    learnings: LearningSet,
    stats: RunStats,
}

/// Cloneable handle to the state of one run
///
/// Alongside the learnings it keeps a running estimate of their serialized
/// size, measured the way the context budget measures it.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<ResearchState>>,
    estimator: Arc<dyn LengthEstimator>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::with_estimator(Arc::new(CharEstimator))
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_estimator(estimator: Arc<dyn LengthEstimator>) -> Self {
        Self {
            inner: Arc::default(),
            estimator,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResearchState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Research state lock poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Register up to `limit` queries that were never issued before.
    ///
    /// Queries are compared case- and whitespace-insensitively, both against
    /// earlier reservations and within `queries`. Returns the reserved
    /// queries in their original order.
    pub fn reserve_queries(&self, queries: Vec<SearchQuery>, limit: usize) -> Vec<SearchQuery> {
        let mut state = self.lock();
        let mut reserved = Vec::new();

        for query in queries {
            if reserved.len() >= limit {
                break;
            }
            let key = normalize_text(&query.query);
            if key.is_empty() || state.issued.contains(&key) {
                continue;
            }
            state.issued.insert(key);
            state.issued_order.push(query.query.trim().to_string());
            reserved.push(query);
        }

        state.stats.queries_issued += reserved.len();
        reserved
    }

    pub fn is_issued(&self, query: &str) -> bool {
        self.lock().issued.contains(&normalize_text(query))
    }

    /// Every query reserved so far, in reservation order.
    pub fn issued_queries(&self) -> Vec<String> {
        self.lock().issued_order.clone()
    }

    /// Keep the results whose sources no earlier caller claimed, and claim them.
    pub fn claim_sources(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        self.lock().sources.claim(results)
    }

    /// Merge learnings, returning how many were new.
    ///
    /// `stats.context_size` tracks the size of all learnings serialized one
    /// per line, including growth from citations merged into duplicates.
    pub fn merge_learnings(&self, learnings: Vec<Learning>) -> usize {
        let mut state = self.lock();
        let separator = self.estimator.estimate("\n");
        let mut added = 0;

        for learning in learnings {
            let text = learning.text.clone();
            let before = state.learnings.get(&text).map(|l| self.cost(l));
            let is_new = state.learnings.insert(learning);
            let after = state.learnings.get(&text).map(|l| self.cost(l));

            let size = &mut state.stats.context_size;
            match (before, after) {
                (None, Some(after)) => {
                    if is_new && *size > 0 {
                        *size += separator;
                    }
                    *size += after;
                }
                (Some(before), Some(after)) => *size = (*size + after).saturating_sub(before),
                _ => {}
            }
            if is_new {
                added += 1;
            }
        }
        added
    }

    fn cost(&self, learning: &Learning) -> usize {
        self.estimator.estimate(&format_learning(learning))
    }

    /// Snapshot of all learnings in insertion order.
    pub fn learnings(&self) -> Vec<Learning> {
        self.lock().learnings.as_slice().to_vec()
    }

    pub fn learning_count(&self) -> usize {
        self.lock().learnings.len()
    }

    /// Snapshot of visited source URLs in first-visit order.
    pub fn sources(&self) -> Vec<String> {
        self.lock().sources.visited().to_vec()
    }

    pub fn source_count(&self) -> usize {
        self.lock().sources.len()
    }

    /// Apply a change to the run counters.
    pub fn update_stats(&self, f: impl FnOnce(&mut RunStats)) {
        f(&mut self.lock().stats);
    }

    /// Counters with learning and source totals filled in.
    pub fn stats(&self) -> RunStats {
        let state = self.lock();
        RunStats {
            learnings: state.learnings.len(),
            sources: state.sources.len(),
            ..state.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queries(texts: &[&str]) -> Vec<SearchQuery> {
        texts.iter().map(|t| SearchQuery::new(*t, "")).collect()
    }

    #[test]
    fn test_reserve_skips_issued_and_caps() {
        let state = SharedState::new();
        let first = state.reserve_queries(queries(&["rust async", "tokio"]), 5);
        assert_eq!(first.len(), 2);

        let second = state.reserve_queries(queries(&["Rust  Async", "mio", "epoll", "io_uring"]), 2);
        let texts: Vec<_> = second.iter().map(|q| q.query.as_str()).collect();
        assert_eq!(texts, vec!["mio", "epoll"]);
        assert_eq!(state.issued_queries().len(), 4);
        assert_eq!(state.stats().queries_issued, 4);
    }

    #[test]
    fn test_reserve_dedupes_within_batch() {
        let state = SharedState::new();
        let reserved = state.reserve_queries(queries(&["a b", "A  B", ""]), 5);
        assert_eq!(reserved.len(), 1);
        assert!(state.is_issued("a b"));
    }

    #[test]
    fn test_claim_sources_across_calls() {
        let state = SharedState::new();
        let first = state.claim_sources(vec![SearchResult::new("https://a.com", "", "")]);
        let second = state.claim_sources(vec![
            SearchResult::new("https://a.com/", "", ""),
            SearchResult::new("https://b.com", "", ""),
        ]);

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(state.sources(), vec!["https://a.com", "https://b.com"]);
    }

    #[test]
    fn test_merge_learnings_counts_new() {
        let state = SharedState::new();
        assert_eq!(
            state.merge_learnings(vec![Learning::new("x"), Learning::new("y")]),
            2
        );
        assert_eq!(state.merge_learnings(vec![Learning::new("X")]), 0);
        assert_eq!(state.learning_count(), 2);
        assert_eq!(state.stats().learnings, 2);
    }

    #[test]
    fn test_context_size_tracks_serialized_learnings() {
        let state = SharedState::new();
        state.merge_learnings(vec![
            Learning::new("Tokio is a runtime").with_sources(vec!["https://tokio.rs".into()]),
            Learning::new("Rust has no GC"),
        ]);
        state.merge_learnings(vec![
            Learning::new("rust has no gc").with_sources(vec!["https://rust-lang.org".into()]),
            Learning::new("   "),
        ]);

        let serialized: Vec<String> = state.learnings().iter().map(format_learning).collect();
        let expected = serialized.join("\n").chars().count();
        assert_eq!(state.stats().context_size, expected);
    }

    #[test]
    fn test_context_size_uses_estimator() {
        let state = SharedState::with_estimator(Arc::new(crate::budget::TokenEstimator));
        state.merge_learnings(vec![Learning::new("abcdefgh")]);
        // "- abcdefgh" is 10 chars, 3 tokens
        assert_eq!(state.stats().context_size, 3);
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_duplicate() {
        let state = SharedState::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move {
                    state.claim_sources(
                        (0..10)
                            .map(|i| SearchResult::new(format!("https://s.com/{}", i), "", ""))
                            .collect(),
                    )
                })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap().len();
        }
        assert_eq!(total, 10);
        assert_eq!(state.source_count(), 10);
    }
}
