//! Research event payloads and accessors.
//!
//! Each stage carries a JSON payload of a known shape. Constructors here are
//! the only place payloads are built; [`ResearchEventExt`] parses them back
//! for presentation layers.

use crate::clarify::ClarifyingQuestion;
use crate::types::{NodeState, OutputMode, ResearchOutcome};
use delver_core::{ProgressEvent, Stage};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

/// Payload of the single `clarifying` event of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationInfo {
    /// No questions were generated (skip requested, answers supplied, or failure)
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub questions: Vec<ClarifyingQuestion>,
    /// Effective topic research proceeds with
    pub topic: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    /// The topic was answered without research
    #[serde(default)]
    pub direct_answer: bool,
}

/// Payload of per-node `planning`, `searching` and `extracting` events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProgress {
    pub node_id: String,
    /// Research levels remaining, counting the node's own
    pub depth: usize,
    pub level: usize,
    pub state: NodeState,
    #[serde(default)]
    pub queries: Vec<String>,
    /// Results the node is extracting from
    #[serde(default)]
    pub results: usize,
}

/// Payload of the `deepening` event emitted once per completed level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelComplete {
    pub level: usize,
    /// Final state of every node on the level, by node id
    pub node_states: BTreeMap<String, NodeState>,
    /// Nodes queued for the next level
    pub next_nodes: usize,
    /// Run-wide totals after merging this level
    pub learnings: usize,
    pub sources: usize,
}

impl LevelComplete {
    pub fn failed_nodes(&self) -> usize {
        self.node_states
            .values()
            .filter(|s| **s == NodeState::Failed)
            .count()
    }
}

/// Payload of the `synthesizing` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisInfo {
    pub mode: OutputMode,
    pub learnings_included: usize,
    pub learnings_dropped: usize,
    pub sources: usize,
    /// Synthesizing from what was gathered before cancellation
    pub partial: bool,
    /// Open questions from the final analysis
    #[serde(default)]
    pub gaps: Vec<String>,
    /// Suggested next steps from the final analysis
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Payload of the terminal `error` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error: String,
    pub cancelled: bool,
}

fn event<T: Serialize>(stage: Stage, message: impl Into<String>, payload: &T) -> ProgressEvent {
    let data = serde_json::to_value(payload).unwrap_or_else(|e| {
        log::warn!("Failed to serialize {} payload: {}", stage, e);
        serde_json::Value::Null
    });
    ProgressEvent::new(stage, message, data)
}

pub(crate) fn clarifying(info: &ClarificationInfo) -> ProgressEvent {
    let message = if info.skipped {
        "Clarification skipped".to_string()
    } else if info.questions.is_empty() {
        "No clarification needed".to_string()
    } else {
        format!("Clarified with {} questions", info.questions.len())
    };
    event(Stage::Clarifying, message, info)
}

pub(crate) fn node(progress: &NodeProgress) -> ProgressEvent {
    let (stage, message) = match progress.state {
        NodeState::Planning => (
            Stage::Planning,
            format!("Node {}: planning queries", progress.node_id),
        ),
        NodeState::Searching => (
            Stage::Searching,
            format!(
                "Node {}: searching {} queries",
                progress.node_id,
                progress.queries.len()
            ),
        ),
        _ => (
            Stage::Extracting,
            format!(
                "Node {}: extracting from {} results",
                progress.node_id, progress.results
            ),
        ),
    };
    event(stage, message, progress)
}

pub(crate) fn level_complete(info: &LevelComplete) -> ProgressEvent {
    event(
        Stage::Deepening,
        format!(
            "Level {} complete: {} learnings, {} sources, {} nodes next",
            info.level, info.learnings, info.sources, info.next_nodes
        ),
        info,
    )
}

pub(crate) fn synthesizing(info: &SynthesisInfo) -> ProgressEvent {
    event(
        Stage::Synthesizing,
        format!(
            "Writing {} from {} learnings",
            info.mode, info.learnings_included
        ),
        info,
    )
}

pub(crate) fn completed(outcome: &ResearchOutcome) -> ProgressEvent {
    event(
        Stage::Completed,
        format!(
            "Research complete: {} learnings, {} sources",
            outcome.learnings.len(),
            outcome.sources.len()
        ),
        outcome,
    )
}

pub(crate) fn error(message: impl Into<String>, cancelled: bool) -> ProgressEvent {
    let message = message.into();
    event(
        Stage::Error,
        message.clone(),
        &ErrorInfo {
            error: message,
            cancelled,
        },
    )
}

/// Extension trait for parsing research payloads from [`ProgressEvent`]
///
/// ```
/// use delver_core::ProgressEvent;
/// use delver_deep_research::ResearchEventExt;
///
/// fn show(event: &ProgressEvent) {
///     if let Some(outcome) = event.as_completed() {
///         println!("{}", outcome.answer);
///     }
/// }
/// ```
pub trait ResearchEventExt {
    /// Parse a `clarifying` event.
    fn as_clarification(&self) -> Option<ClarificationInfo>;

    /// Parse a per-node `planning`, `searching` or `extracting` event.
    fn as_node_progress(&self) -> Option<NodeProgress>;

    /// Parse a `deepening` event.
    fn as_level_complete(&self) -> Option<LevelComplete>;

    fn as_synthesis(&self) -> Option<SynthesisInfo>;

    /// Parse a `completed` event into the run outcome.
    fn as_completed(&self) -> Option<ResearchOutcome>;

    fn as_error(&self) -> Option<ErrorInfo>;
}

fn parse<T: DeserializeOwned>(event: &ProgressEvent, stages: &[Stage]) -> Option<T> {
    if !stages.contains(&event.stage) {
        return None;
    }
    serde_json::from_value(event.data.clone())
        .map_err(|e| log::warn!("Failed to parse {} data: {}", event.stage, e))
        .ok()
}

impl ResearchEventExt for ProgressEvent {
    fn as_clarification(&self) -> Option<ClarificationInfo> {
        parse(self, &[Stage::Clarifying])
    }

    fn as_node_progress(&self) -> Option<NodeProgress> {
        parse(
            self,
            &[Stage::Planning, Stage::Searching, Stage::Extracting],
        )
    }

    fn as_level_complete(&self) -> Option<LevelComplete> {
        parse(self, &[Stage::Deepening])
    }

    fn as_synthesis(&self) -> Option<SynthesisInfo> {
        parse(self, &[Stage::Synthesizing])
    }

    fn as_completed(&self) -> Option<ResearchOutcome> {
        parse(self, &[Stage::Completed])
    }

    fn as_error(&self) -> Option<ErrorInfo> {
        parse(self, &[Stage::Error])
    }
}
