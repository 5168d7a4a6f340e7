//! Indicatif-based renderer for CLI progress display.

use super::renderer::Renderer;
use super::state::{DisplayState, Phase};
use crate::format::{format_duration, print_final_result, truncate};
use anyhow::Result;
use delver_deep_research::NodeState;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(120);

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Renderer using indicatif spinners: one for the run phase, one per node.
pub struct IndicatifRenderer {
    multi: MultiProgress,
    phase_bar: Option<ProgressBar>,
    node_bars: HashMap<String, ProgressBar>,
}

impl IndicatifRenderer {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            phase_bar: None,
            node_bars: HashMap::new(),
        }
    }

    /// Finish the current phase spinner with `done` and start a new one.
    fn next_phase(&mut self, done: Option<String>, message: String) {
        if let Some(bar) = self.phase_bar.take() {
            match done {
                Some(done) => bar.finish_with_message(done),
                None => bar.finish_and_clear(),
            }
        }
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(style("{spinner:.cyan} {msg}"));
        bar.enable_steady_tick(TICK);
        bar.set_message(message);
        self.phase_bar = Some(bar);
    }

    fn finish_phase(&mut self, message: String) {
        if let Some(bar) = self.phase_bar.take() {
            bar.finish_with_message(message);
        }
    }

    fn clear_node_bars(&mut self) {
        for (_, pb) in self.node_bars.drain() {
            if !pb.is_finished() {
                pb.finish_and_clear();
            }
        }
    }
}

impl Default for IndicatifRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for IndicatifRenderer {
    fn on_phase_change(&mut self, state: &DisplayState) -> Result<()> {
        match state.phase() {
            Phase::NotStarted => {}

            Phase::Clarifying => {
                let message = match state.clarification() {
                    Some(info) if !info.assumptions.is_empty() => format!(
                        "✓ Topic: {} ({} assumptions)",
                        truncate(&info.topic, 50),
                        info.assumptions.len()
                    ),
                    Some(info) => format!("✓ Topic: {}", truncate(&info.topic, 60)),
                    None => "✓ Clarification done".to_string(),
                };
                self.next_phase(Some(message), "🔍 Planning research...".to_string());
            }

            Phase::Researching(0) => {
                let message = "⚡ Researching level 0...";
                if let Some(bar) = &self.phase_bar {
                    bar.set_message(message);
                } else {
                    self.next_phase(None, message.to_string());
                }
            }

            Phase::Researching(level) => {
                let done = format!(
                    "✓ Level {} done: {} learnings, {} sources",
                    level - 1,
                    state.learnings(),
                    state.sources()
                );
                self.next_phase(Some(done), format!("⚡ Researching level {}...", level));
            }

            Phase::Synthesizing => {
                self.clear_node_bars();
                let message = match state.synthesis() {
                    Some(info) if info.partial => format!(
                        "🧠 Interrupted: writing {} from {} learnings...",
                        info.mode, info.learnings_included
                    ),
                    Some(info) => format!(
                        "🧠 Writing {} from {} learnings...",
                        info.mode, info.learnings_included
                    ),
                    None => "🧠 Synthesizing...".to_string(),
                };
                let done = format!(
                    "✓ Research done: {} learnings, {} sources",
                    state.learnings(),
                    state.sources()
                );
                self.next_phase(Some(done), message);
            }

            Phase::Complete => {
                self.finish_phase(format!("✓ Done in {}", format_duration(state.elapsed())));
            }

            Phase::Failed => {
                self.clear_node_bars();
                self.finish_phase("❌ Research failed".to_string());
            }
        }

        Ok(())
    }

    fn on_node_update(&mut self, state: &DisplayState, id: &str) -> Result<()> {
        let Some(node) = state.node(id) else {
            return Ok(());
        };

        let multi = &self.multi;
        let pb = self.node_bars.entry(id.to_string()).or_insert_with(|| {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(style("   {spinner:.cyan} [{prefix}] {msg}"));
            pb.set_prefix(node.id.clone());
            pb.enable_steady_tick(TICK);
            pb
        });
        if pb.is_finished() {
            return Ok(());
        }

        let queries = || truncate(&node.queries.join(" | "), 50);
        let duration = || node.duration.map(format_duration).unwrap_or_else(|| "?".to_string());
        match node.state {
            NodeState::Planning => pb.set_message("planning queries..."),
            NodeState::Searching => pb.set_message(format!("searching: {}", queries())),
            NodeState::Extracting => {
                pb.set_message(format!("extracting from {} results", node.results))
            }
            NodeState::Done | NodeState::Deepening => {
                pb.finish_with_message(format!("✅ {} → {}", duration(), queries()))
            }
            NodeState::Failed => pb.finish_with_message(format!("❌ {} → failed", duration())),
        }

        Ok(())
    }

    fn on_final_result(&mut self, state: &DisplayState) -> Result<()> {
        if let Some(outcome) = state.outcome() {
            self.clear_node_bars();
            print_final_result(outcome, state.elapsed());
        }
        Ok(())
    }

    fn on_error(&mut self, state: &DisplayState) -> Result<()> {
        if let Some(error) = state.error() {
            if error.cancelled {
                eprintln!("\nInterrupted before anything was learned: {}", error.error);
            } else {
                eprintln!("\nResearch failed: {}", error.error);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.clear_node_bars();
        if let Some(bar) = self.phase_bar.take() {
            if !bar.is_finished() {
                bar.finish_and_clear();
            }
        }
        Ok(())
    }
}
