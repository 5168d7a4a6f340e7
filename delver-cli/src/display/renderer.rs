//! Renderer trait for swappable display backends.

use super::state::DisplayState;
use anyhow::Result;

/// Renders research progress to the terminal.
///
/// Implementors receive notifications when state changes and are
/// responsible for updating the terminal display accordingly.
pub trait Renderer {
    /// Called when the run phase changes.
    ///
    /// Phases progress: NotStarted → Clarifying → Researching(level) →
    /// Synthesizing → Complete, or end in Failed.
    fn on_phase_change(&mut self, state: &DisplayState) -> Result<()>;

    /// Called when a node's status changes.
    fn on_node_update(&mut self, state: &DisplayState, id: &str) -> Result<()>;

    /// Called once the outcome is available.
    fn on_final_result(&mut self, state: &DisplayState) -> Result<()>;

    /// Called when the run ended with an error event.
    fn on_error(&mut self, state: &DisplayState) -> Result<()>;

    /// Called when the stream ends to clean up resources.
    fn finish(&mut self) -> Result<()>;
}
