//! Terminal-agnostic state tracking for research progress.
//!
//! Pure state with no terminal dependencies, updated from the agent's
//! progress events and read by renderers.

use delver_core::{ProgressEvent, Stage};
use delver_deep_research::{
    ClarificationInfo, ErrorInfo, NodeState, ResearchEventExt, ResearchOutcome, SynthesisInfo,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Coarse run phase, driving the top-level spinner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Clarifying,
    /// Expanding the research tree; carries the current level
    Researching(usize),
    Synthesizing,
    Complete,
    Failed,
}

/// One node of the research tree as seen by the display
#[derive(Debug, Clone)]
pub struct NodeView {
    pub id: String,
    pub level: usize,
    pub state: NodeState,
    pub queries: Vec<String>,
    pub results: usize,
    pub start_time: Instant,
    pub duration: Option<Duration>,
}

impl NodeView {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            NodeState::Done | NodeState::Deepening | NodeState::Failed
        )
    }
}

/// Terminal-agnostic state machine for research progress
pub struct DisplayState {
    phase: Phase,
    nodes: BTreeMap<String, NodeView>,
    learnings: usize,
    sources: usize,
    levels_completed: usize,
    start_time: Instant,
    clarification: Option<ClarificationInfo>,
    synthesis: Option<SynthesisInfo>,
    outcome: Option<ResearchOutcome>,
    error: Option<ErrorInfo>,
}

impl DisplayState {
    pub fn new() -> Self {
        Self {
            phase: Phase::NotStarted,
            nodes: BTreeMap::new(),
            learnings: 0,
            sources: 0,
            levels_completed: 0,
            start_time: Instant::now(),
            clarification: None,
            synthesis: None,
            outcome: None,
            error: None,
        }
    }

    /// Apply one event.
    ///
    /// Returns the ids of nodes whose status changed.
    pub fn update(&mut self, event: &ProgressEvent) -> Vec<String> {
        match event.stage {
            Stage::Clarifying => {
                self.phase = Phase::Clarifying;
                self.clarification = event.as_clarification();
                Vec::new()
            }

            Stage::Planning | Stage::Searching | Stage::Extracting => {
                let Some(progress) = event.as_node_progress() else {
                    log::warn!("Malformed {} event: {:?}", event.stage, event.data);
                    return Vec::new();
                };
                self.phase = Phase::Researching(progress.level);

                let node = self
                    .nodes
                    .entry(progress.node_id.clone())
                    .or_insert_with(|| NodeView {
                        id: progress.node_id.clone(),
                        level: progress.level,
                        state: progress.state,
                        queries: Vec::new(),
                        results: 0,
                        start_time: Instant::now(),
                        duration: None,
                    });
                node.state = progress.state;
                if !progress.queries.is_empty() {
                    node.queries = progress.queries;
                }
                node.results = node.results.max(progress.results);
                vec![progress.node_id]
            }

            Stage::Deepening => {
                let Some(level) = event.as_level_complete() else {
                    log::warn!("Malformed deepening event: {:?}", event.data);
                    return Vec::new();
                };
                self.learnings = level.learnings;
                self.sources = level.sources;
                self.levels_completed = level.level + 1;

                let mut changed = Vec::new();
                for (id, state) in level.node_states {
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.state = state;
                        node.duration = Some(node.start_time.elapsed());
                        changed.push(id);
                    }
                }
                changed
            }

            Stage::Synthesizing => {
                self.phase = Phase::Synthesizing;
                self.synthesis = event.as_synthesis();
                Vec::new()
            }

            Stage::Completed => {
                match event.as_completed() {
                    Some(outcome) => {
                        self.learnings = outcome.learnings.len();
                        self.sources = outcome.sources.len();
                        self.outcome = Some(outcome);
                        self.phase = Phase::Complete;
                    }
                    None => log::warn!("Malformed completed event: {:?}", event.data),
                }
                Vec::new()
            }

            Stage::Error => {
                self.error = Some(event.as_error().unwrap_or_else(|| ErrorInfo {
                    error: event.message.clone(),
                    cancelled: false,
                }));
                self.phase = Phase::Failed;
                Vec::new()
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn node(&self, id: &str) -> Option<&NodeView> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeView> {
        self.nodes.values()
    }

    pub fn learnings(&self) -> usize {
        self.learnings
    }

    pub fn sources(&self) -> usize {
        self.sources
    }

    pub fn levels_completed(&self) -> usize {
        self.levels_completed
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn clarification(&self) -> Option<&ClarificationInfo> {
        self.clarification.as_ref()
    }

    pub fn synthesis(&self) -> Option<&SynthesisInfo> {
        self.synthesis.as_ref()
    }

    pub fn outcome(&self) -> Option<&ResearchOutcome> {
        self.outcome.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new()
    }
}
