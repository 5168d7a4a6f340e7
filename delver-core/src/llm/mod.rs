//! LLM client
//!
//! Provides a simplified interface over a text-generation backend with:
//! - Automatic timeout enforcement from config
//! - Automatic retry with exponential backoff on transient failures
//! - Cooperative cancellation via `CancellationToken`
//! - Structured output parsed straight into serde types
//!
//! # Example
//!
//! ```no_run
//! use delver_core::{LlmClient, LlmConfig, LlmRequest, OpenAiBackend};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[derive(serde::Deserialize)]
//! # struct Plan { queries: Vec<String> }
//! # async fn example() -> Result<(), delver_core::LlmError> {
//! let backend = OpenAiBackend::new("sk-...")?;
//! let client = LlmClient::new(Arc::new(backend), LlmConfig::default());
//!
//! let request = LlmRequest::new("List two search queries about tokio")
//!     .with_response_format(serde_json::json!({"type": "object"}))
//!     .with_label("planning");
//! let plan: Plan = client.generate_json(request, &CancellationToken::new()).await?;
//! println!("{:?}", plan.queries);
//! # Ok(())
//! # }
//! ```

mod client;
mod openai;
mod request;

pub use client::{LlmBackend, LlmClient};
pub use openai::{OpenAiBackend, DEFAULT_BASE_URL};
pub use request::{LlmRequest, LlmResponse};
