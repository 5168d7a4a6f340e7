//! Context budget management.
//!
//! Learnings are serialized one entry per line. When the full list does not
//! fit, the oldest entries are dropped whole until it does; an entry is never
//! cut in half.

use crate::types::Learning;
use std::fmt;
use std::sync::Arc;

/// Measures text size in the unit the budget is expressed in
///
/// Implementations must be subadditive: the estimate of a concatenation never
/// exceeds the sum of the parts' estimates. Budget fitting relies on this.
pub trait LengthEstimator: Send + Sync + fmt::Debug {
    fn estimate(&self, text: &str) -> usize;
}

/// Counts Unicode scalar values
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

impl LengthEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count()
    }
}

/// Approximates model tokens as one per four characters, rounded up
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator;

impl LengthEstimator for TokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// Serialized learnings that fit a budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FittedContext {
    pub text: String,
    pub included: usize,
    pub dropped: usize,
}

/// Serialize one learning as a single bullet line.
pub fn format_learning(learning: &Learning) -> String {
    if learning.sources.is_empty() {
        format!("- {}", learning.text)
    } else {
        format!(
            "- {} (sources: {})",
            learning.text,
            learning.sources.join(", ")
        )
    }
}

const SEPARATOR: &str = "\n";

/// Keeps serialized context under a configured size
#[derive(Debug, Clone)]
pub struct ContextBudget {
    max: usize,
    estimator: Arc<dyn LengthEstimator>,
}

impl ContextBudget {
    pub fn new(max: usize, estimator: Arc<dyn LengthEstimator>) -> Self {
        Self { max, estimator }
    }

    /// Budget measured in characters.
    pub fn chars(max: usize) -> Self {
        Self::new(max, Arc::new(CharEstimator))
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Same estimator, different ceiling.
    pub fn with_max(&self, max: usize) -> Self {
        Self {
            max,
            estimator: Arc::clone(&self.estimator),
        }
    }

    pub fn estimate(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    /// Serialize learnings in insertion order, dropping the oldest first.
    ///
    /// The kept entries always form the newest contiguous suffix of the input
    /// and appear byte-identical to [`format_learning`]'s output.
    pub fn fit_learnings(&self, learnings: &[Learning]) -> FittedContext {
        let separator = self.estimate(SEPARATOR);
        let mut used = 0usize;
        let mut kept: Vec<String> = Vec::new();

        for learning in learnings.iter().rev() {
            let entry = format_learning(learning);
            let cost = self.estimate(&entry) + if kept.is_empty() { 0 } else { separator };
            if used + cost > self.max {
                break;
            }
            used += cost;
            kept.push(entry);
        }

        kept.reverse();
        let included = kept.len();
        let dropped = learnings.len() - included;
        if dropped > 0 {
            log::warn!(
                "Context budget of {} exceeded: kept {} newest learnings, dropped {} oldest",
                self.max,
                included,
                dropped
            );
        }

        FittedContext {
            text: kept.join(SEPARATOR),
            included,
            dropped,
        }
    }

    /// Truncate free text to at most `max` estimated units, marking the cut.
    pub fn clip(&self, text: &str, max: usize) -> String {
        let text = text.trim();
        if self.estimate(text) <= max {
            return text.to_string();
        }

        const MARKER: &str = " [...]";
        let room = max.saturating_sub(self.estimate(MARKER));
        let mut keep = text.chars().count();
        // Shrink proportionally, then step down until it fits.
        keep = keep * room / self.estimate(text).max(1);
        loop {
            let candidate: String = text.chars().take(keep).collect();
            if self.estimate(&candidate) <= room || keep == 0 {
                return if candidate.is_empty() {
                    String::new()
                } else {
                    format!("{}{}", candidate.trim_end(), MARKER)
                };
            }
            keep -= 1;
        }
    }
}
