//! Progress events streamed from a research run.
//!
//! Events are soft-typed: a fixed [`Stage`] tag plus a human-readable message
//! and a JSON payload whose shape depends on the emitting component. The core
//! only ever appends to a [`ProgressSink`]; presentation layers drain the
//! receiving end on their own schedule.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Pipeline stage a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clarifying,
    Planning,
    Searching,
    Extracting,
    Deepening,
    Synthesizing,
    Completed,
    Error,
}

impl Stage {
    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clarifying => "clarifying",
            Stage::Planning => "planning",
            Stage::Searching => "searching",
            Stage::Extracting => "extracting",
            Stage::Deepening => "deepening",
            Stage::Synthesizing => "synthesizing",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }

    /// Whether this stage ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress event
///
/// # Example
///
/// ```
/// use delver_core::{ProgressEvent, Stage};
/// use serde_json::json;
///
/// let event = ProgressEvent::new(Stage::Searching, "Searching 3 queries", json!({ "count": 3 }));
/// assert_eq!(event.stage, Stage::Searching);
/// assert_eq!(event.data["count"], 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Pipeline stage
    pub stage: Stage,

    /// Human-readable description
    pub message: String,

    /// Stage-specific payload
    pub data: serde_json::Value,

    /// When the event was created
    pub timestamp: SystemTime,
}

impl ProgressEvent {
    /// Create an event stamped with the current time.
    pub fn new(stage: Stage, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            stage,
            message: message.into(),
            data,
            timestamp: SystemTime::now(),
        }
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Append-only, never-blocking sender half of the progress channel
///
/// Backed by an unbounded channel so a slow consumer can never stall the
/// research loop. Once the receiver is dropped, sends are discarded.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Append an event.
    pub fn emit(&self, event: ProgressEvent) {
        let Some(ref tx) = self.tx else {
            return;
        };
        if tx.send(event).is_err() {
            log::debug!("Progress receiver dropped, discarding event");
        }
    }

    /// Build and append an event.
    pub fn send(&self, stage: Stage, message: impl Into<String>, data: serde_json::Value) {
        self.emit(ProgressEvent::new(stage, message, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_serde_matches_as_str() {
        for stage in [
            Stage::Clarifying,
            Stage::Planning,
            Stage::Searching,
            Stage::Extracting,
            Stage::Deepening,
            Stage::Synthesizing,
            Stage::Completed,
            Stage::Error,
        ] {
            let serialized = serde_json::to_value(stage).unwrap();
            assert_eq!(serialized, json!(stage.as_str()));
        }
    }

    #[test]
    fn test_terminal_stages() {
        assert!(Stage::Completed.is_terminal());
        assert!(Stage::Error.is_terminal());
        assert!(!Stage::Deepening.is_terminal());
    }

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.send(Stage::Planning, "first", json!({}));
        sink.send(Stage::Searching, "second", json!({}));
        drop(sink);

        assert_eq!(rx.recv().await.unwrap().message, "first");
        assert_eq!(rx.recv().await.unwrap().message, "second");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_sink_ignores_dropped_receiver() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        sink.send(Stage::Error, "nobody listening", json!({}));
    }

    #[test]
    fn test_disabled_sink() {
        ProgressSink::disabled().send(Stage::Completed, "done", json!({}));
    }
}
