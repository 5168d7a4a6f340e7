//! Configuration file loading and layering.
//!
//! # Config File Locations
//!
//! Config files are loaded in priority order (later overrides earlier):
//! 1. `~/.delver/config.toml` - User-global defaults
//! 2. `./delver.toml` - Project-local overrides
//! 3. `--config PATH` - Per-invocation file
//!
//! # Example Config File
//!
//! ```toml
//! [llm]
//! model = "gpt-4o-mini"
//! base_url = "http://localhost:11434/v1"
//!
//! [search]
//! source = "tavily"
//! max_results_per_query = 5
//!
//! [research]
//! breadth = 4
//! depth = 2
//! mode = "report"
//! concurrency = 3
//!
//! [research.prompts]
//! synthesis_system = "You are a meticulous research analyst..."
//! ```

mod loader;
mod settings;
mod types;

pub use loader::ConfigLoader;
pub use settings::Settings;
