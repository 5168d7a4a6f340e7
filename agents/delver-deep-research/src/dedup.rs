//! Visited-source tracking and learning deduplication.

use crate::types::Learning;
use delver_core::{normalize_text, normalize_url, SearchResult};
use std::collections::{HashMap, HashSet};

/// Set of source identifiers visited during a run
///
/// URLs are compared after [`normalize_url`], so trailing slashes, fragments
/// and host case do not produce repeat visits.
#[derive(Debug, Default, Clone)]
pub struct Deduplicator {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.seen.contains(&normalize_url(url))
    }

    /// Record a URL; returns `false` if it was already visited.
    pub fn mark(&mut self, url: &str) -> bool {
        let key = normalize_url(url);
        if key.is_empty() || !self.seen.insert(key) {
            return false;
        }
        self.order.push(url.trim().to_string());
        true
    }

    /// Keep only results whose source was not visited yet, then mark them.
    ///
    /// Duplicates within `results` are collapsed to their first occurrence.
    pub fn claim(&mut self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        results.into_iter().filter(|r| self.mark(&r.url)).collect()
    }

    /// Visited URLs in first-visit order.
    pub fn visited(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Insertion-ordered learning set keyed by normalized text
///
/// Two learnings are duplicates when their texts are equal after
/// [`normalize_text`]. Re-inserting a duplicate merges its citations into the
/// existing entry and leaves the text untouched. Swapping [`Self::key`] for a
/// similarity measure is the intended extension point for fuzzy merging.
#[derive(Debug, Default, Clone)]
pub struct LearningSet {
    entries: Vec<Learning>,
    index: HashMap<String, usize>,
}

impl LearningSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(text: &str) -> String {
        normalize_text(text)
    }

    /// Insert a learning; returns `true` if it was new.
    pub fn insert(&mut self, learning: Learning) -> bool {
        let key = Self::key(&learning.text);
        if key.is_empty() {
            return false;
        }

        if let Some(&pos) = self.index.get(&key) {
            let existing = &mut self.entries[pos];
            for source in learning.sources {
                if !existing.sources.contains(&source) {
                    existing.sources.push(source);
                }
            }
            return false;
        }

        self.index.insert(key, self.entries.len());
        self.entries.push(Learning {
            text: learning.text.trim().to_string(),
            sources: learning.sources,
        });
        true
    }

    pub fn contains(&self, text: &str) -> bool {
        self.index.contains_key(&Self::key(text))
    }

    /// The stored learning that `text` is a duplicate of, if any.
    pub fn get(&self, text: &str) -> Option<&Learning> {
        self.index.get(&Self::key(text)).map(|&pos| &self.entries[pos])
    }

    /// Learnings in insertion order (oldest first).
    pub fn as_slice(&self) -> &[Learning] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mark_normalizes() {
        let mut dedup = Deduplicator::new();
        assert!(dedup.mark("https://Example.com/a/"));
        assert!(!dedup.mark("https://example.com/a#top"));
        assert!(dedup.is_visited("https://example.com/a"));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_mark_rejects_empty() {
        let mut dedup = Deduplicator::new();
        assert!(!dedup.mark("  "));
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_claim_filters_visited_and_batch_duplicates() {
        let mut dedup = Deduplicator::new();
        dedup.mark("https://a.com/x");

        let claimed = dedup.claim(vec![
            SearchResult::new("https://a.com/x", "old", ""),
            SearchResult::new("https://b.com/y", "new", ""),
            SearchResult::new("https://b.com/y/", "dup", ""),
        ]);

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].title, "new");
        assert_eq!(dedup.visited(), &["https://a.com/x", "https://b.com/y"]);
    }

    #[test]
    fn test_learning_reinsertion_is_idempotent() {
        let mut set = LearningSet::new();
        assert!(set.insert(Learning::new("Tokio uses a work-stealing scheduler.")));
        assert!(!set.insert(Learning::new("  tokio uses a   work-stealing scheduler. ")));
        assert_eq!(set.len(), 1);
        assert_eq!(set.as_slice()[0].text, "Tokio uses a work-stealing scheduler.");
    }

    #[test]
    fn test_duplicate_merges_sources() {
        let mut set = LearningSet::new();
        set.insert(Learning::new("Fact").with_sources(vec!["https://a".into()]));
        set.insert(Learning::new("fact").with_sources(vec!["https://a".into(), "https://b".into()]));

        assert_eq!(
            set.as_slice()[0].sources,
            vec!["https://a".to_string(), "https://b".to_string()]
        );
    }

    proptest! {
        #[test]
        fn prop_no_url_recorded_twice(urls in prop::collection::vec("https://[a-c]\\.com/[a-c]{0,2}/?", 0..50)) {
            let mut dedup = Deduplicator::new();
            let results: Vec<SearchResult> =
                urls.iter().map(|u| SearchResult::new(u.clone(), "", "")).collect();
            let total = results.len();
            let claimed = dedup.claim(results);

            prop_assert!(dedup.len() <= total);
            prop_assert_eq!(claimed.len(), dedup.len());
            let keys: HashSet<String> = dedup.visited().iter().map(|u| normalize_url(u)).collect();
            prop_assert_eq!(keys.len(), dedup.len());
        }

        #[test]
        fn prop_learning_set_idempotent(texts in prop::collection::vec("[a-dA-D ]{1,12}", 0..30)) {
            let mut once = LearningSet::new();
            let mut twice = LearningSet::new();
            for t in &texts {
                once.insert(Learning::new(t.clone()));
                twice.insert(Learning::new(t.clone()));
                twice.insert(Learning::new(t.clone()));
            }
            prop_assert_eq!(once.as_slice(), twice.as_slice());
        }
    }
}
