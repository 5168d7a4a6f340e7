//! Display module for CLI rendering.
//!
//! - `state`: terminal-agnostic progress state
//! - `renderer`: trait for swappable backends
//! - `indicatif`: indicatif-based implementation

mod indicatif;
mod renderer;
mod state;

pub use indicatif::IndicatifRenderer;
pub use renderer::Renderer;
pub use state::{DisplayState, Phase};
