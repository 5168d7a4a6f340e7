//! # Delver Core
//!
//! Collaborator seams shared by the delver research agent and its front ends.
//!
//! ## Architecture
//!
//! - **LLM**: [`LlmClient`] layers timeout, retry and cancellation over any
//!   [`LlmBackend`]; [`OpenAiBackend`] speaks the OpenAI chat protocol
//! - **Search**: [`SearchProvider`] implementations (Tavily, Serper) normalize
//!   results into one [`SearchResult`] shape; [`SearchRegistry`] selects one
//!   by [`SearchSource`]
//! - **Fetch**: [`ContentFetcher`] turns URLs into readable text
//! - **Progress**: [`ProgressEvent`]s flow through a never-blocking [`ProgressSink`]
//!
//! No configuration is read from the environment here; every value is passed
//! in explicitly.
//!
//! ## Example
//!
//! ```no_run
//! use delver_core::{
//!     LlmClient, LlmConfig, OpenAiBackend, SearchRegistry, SearchSource, TavilyProvider,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let llm = LlmClient::new(Arc::new(OpenAiBackend::new("sk-...")?), LlmConfig::default());
//! let search = SearchRegistry::new().with_provider(
//!     SearchSource::Tavily,
//!     Arc::new(TavilyProvider::new("tvly-...", Duration::from_secs(30))?),
//! );
//! # let _ = (llm, search);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod llm;
pub mod mock;
pub mod search;
pub mod update;
pub mod utils;

// Re-export public API
pub use config::{LlmConfig, SearchConfig, DEFAULT_MODEL};
pub use error::{DelverError, LlmError, SearchError};
pub use fetch::{ContentFetcher, HttpFetcher};
pub use llm::{LlmBackend, LlmClient, LlmRequest, LlmResponse, OpenAiBackend};
pub use search::{
    SearchProvider, SearchRegistry, SearchResult, SearchSource, SerperProvider, TavilyProvider,
};
pub use update::{ProgressEvent, ProgressSink, Stage};
pub use utils::{normalize_text, normalize_url, strip_code_fence, truncate, truncate_with_count};
