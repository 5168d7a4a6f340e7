//! Request, node and result types for a research run.

use crate::error::ResearchError;
use delver_core::SearchSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Default number of queries planned at the root
pub const DEFAULT_BREADTH: usize = 4;

/// Default number of research levels
pub const DEFAULT_DEPTH: usize = 2;

/// Shape of the final output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Short direct answer
    Concise,
    /// Long-form structured report citing sources
    #[default]
    Report,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Concise => "concise",
            OutputMode::Report => "report",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "concise" | "answer" => Ok(OutputMode::Concise),
            "report" => Ok(OutputMode::Report),
            other => Err(ResearchError::InvalidRequest(format!(
                "Unknown output mode '{}', expected 'concise' or 'report'",
                other
            ))),
        }
    }
}

/// How the clarification stage should behave
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clarifications {
    /// Ask the model for clarifying questions and collect answers through
    /// the context's handler (defaults are used when there is none)
    #[default]
    Ask,
    /// Answers supplied up front, keyed by question or topic aspect
    Answers(BTreeMap<String, String>),
    /// Skip clarification and research the topic as given
    SkipAll,
}

/// Immutable input to one research run
///
/// # Example
///
/// ```
/// use delver_deep_research::{OutputMode, ResearchRequest};
///
/// let request = ResearchRequest::new("How do CRDTs handle deletes?")
///     .with_breadth(3)
///     .with_depth(1)
///     .with_mode(OutputMode::Concise)
///     .skip_clarification();
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    /// Research topic
    pub topic: String,

    /// Maximum queries planned at the root; children get a fraction of it
    pub breadth: usize,

    /// Research levels, counting the root's (0 and 1 both mean root queries only)
    pub depth: usize,

    /// Output shape
    pub mode: OutputMode,

    /// Prior conversation or context text threaded into every prompt
    pub history_context: Option<String>,

    /// Clarification behavior
    pub clarifications: Clarifications,

    /// Which search provider to use
    pub source: SearchSource,
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            breadth: DEFAULT_BREADTH,
            depth: DEFAULT_DEPTH,
            mode: OutputMode::default(),
            history_context: None,
            clarifications: Clarifications::default(),
            source: SearchSource::default(),
        }
    }

    #[must_use]
    pub fn with_breadth(mut self, breadth: usize) -> Self {
        self.breadth = breadth;
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_history_context(mut self, history: impl Into<String>) -> Self {
        self.history_context = Some(history.into());
        self
    }

    #[must_use]
    pub fn with_answers(mut self, answers: BTreeMap<String, String>) -> Self {
        self.clarifications = Clarifications::Answers(answers);
        self
    }

    #[must_use]
    pub fn skip_clarification(mut self) -> Self {
        self.clarifications = Clarifications::SkipAll;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: SearchSource) -> Self {
        self.source = source;
        self
    }

    /// History text for prompts, or a marker when there is none.
    pub(crate) fn history(&self) -> &str {
        self.history_context
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or("(none)")
    }

    pub fn validate(&self) -> Result<(), ResearchError> {
        let mut errors = Vec::new();
        if self.topic.trim().is_empty() {
            errors.push("topic cannot be empty".to_string());
        }
        if self.breadth == 0 {
            errors.push("breadth must be at least 1".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ResearchError::InvalidRequest(errors.join("; ")))
        }
    }
}

/// A planned web search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    /// Why this query advances the research (traceability only)
    #[serde(default)]
    pub rationale: String,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            rationale: rationale.into(),
        }
    }
}

/// An atomic factual statement with optional citations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Learning {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl Learning {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }
}

/// Lifecycle of one research node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Planning,
    Searching,
    Extracting,
    /// Done, with children queued for the next level
    Deepening,
    Done,
    /// Contributed nothing; never fails the run
    Failed,
}

/// One unit of recursive work
///
/// Nodes are plain descriptors; all accumulated results live in the shared
/// run state, never in the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchNode {
    /// Dotted path from the root, e.g. "0.2.1"
    pub id: String,
    /// The query this node expands
    pub query: SearchQuery,
    /// Follow-up questions the parent's extraction produced for this query
    pub follow_ups: Vec<String>,
    /// Research levels remaining, counting this node's own
    pub depth: usize,
    /// Maximum queries this node plans
    pub breadth: usize,
}

impl ResearchNode {
    /// The root node, seeded with the topic itself.
    pub fn root(topic: &str, breadth: usize, depth: usize) -> Self {
        Self {
            id: "0".to_string(),
            query: SearchQuery::new(topic, "research topic"),
            follow_ups: Vec::new(),
            depth,
            breadth,
        }
    }

    /// A child node one level further down.
    pub fn child(
        &self,
        index: usize,
        query: SearchQuery,
        follow_ups: Vec<String>,
        breadth: usize,
    ) -> Self {
        Self {
            id: format!("{}.{}", self.id, index),
            query,
            follow_ups,
            depth: self.depth.saturating_sub(1),
            breadth,
        }
    }

    pub fn level(&self) -> usize {
        self.id.matches('.').count()
    }

    /// Whether this node's follow-ups may become child nodes.
    pub fn can_recurse(&self) -> bool {
        self.depth > 1
    }
}

/// Counters gathered over a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub levels_completed: usize,
    pub nodes_run: usize,
    pub nodes_failed: usize,
    pub queries_issued: usize,
    pub searches_failed: usize,
    pub extractions_failed: usize,
    pub learnings: usize,
    pub sources: usize,
    /// Estimated serialized size of all learnings, in the budget's unit
    #[serde(default)]
    pub context_size: usize,
    pub cancelled: bool,
}

/// Final result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    /// Effective topic after clarification
    pub topic: String,
    /// Topic as submitted
    pub original_topic: String,
    /// Report or concise answer
    pub answer: String,
    pub mode: OutputMode,
    /// Assumptions made during clarification
    pub assumptions: Vec<String>,
    pub learnings: Vec<Learning>,
    /// Visited source URLs
    pub sources: Vec<String>,
    /// Open questions from the final analysis
    #[serde(default)]
    pub gaps: Vec<String>,
    /// Suggested next steps from the final analysis
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub stats: RunStats,
}
