//! Deep Research Agent
//!
//! Recursive web research: clarify the topic, plan search queries, run them,
//! extract learnings, follow up on what was learned, and synthesize a report.
//!
//! # Architecture
//!
//! 1. **Clarification**: optionally ask clarifying questions and refine the topic
//! 2. **Tree expansion**: level by level, each node plans up to `breadth`
//!    queries, searches them concurrently and extracts learnings; queries that
//!    yield follow-up questions become child nodes while more than one level
//!    of depth remains
//! 3. **Analysis**: one optional call draws findings, gaps and recommendations
//!    from everything learned; the findings join the learnings
//! 4. **Synthesis**: one call writes a concise answer or a cited report from
//!    the accumulated learnings, fitted to the context budget
//!
//! Every external call (model, search, fetch) shares one run-wide
//! concurrency limit. Node, query and extraction failures stay local; only
//! configuration errors, cancellation with nothing learned, and synthesis
//! failure end a run with an error.
//!
//! # Example
//!
//! ```no_run
//! use delver_core::mock::{MockLlm, MockSearch};
//! use delver_core::{LlmClient, LlmConfig, ProgressSink, SearchRegistry, SearchSource};
//! use delver_deep_research::{DeepResearcher, ResearchConfig, ResearchContext, ResearchRequest};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let llm = LlmClient::new(Arc::new(MockLlm::text("{}")), LlmConfig::default());
//! let search = SearchRegistry::new().with_provider(SearchSource::Serper, Arc::new(MockSearch::new()));
//! let researcher = DeepResearcher::new(ResearchConfig::default().with_concurrency(4))?;
//!
//! let request = ResearchRequest::new("How do CRDTs handle deletes?")
//!     .with_breadth(3)
//!     .with_depth(1)
//!     .skip_clarification();
//! let outcome = researcher
//!     .run(request, &ResearchContext::new(llm, search), &ProgressSink::disabled())
//!     .await?;
//! println!("{}", outcome.answer);
//! # Ok(())
//! # }
//! ```

mod agent;
mod analysis;
mod budget;
mod clarify;
mod config;
mod dedup;
mod error;
mod events;
mod executor;
mod extractor;
mod limiter;
mod planner;
mod state;
mod synthesis;
mod types;

pub use agent::{DeepResearcher, ResearchContext};
pub use analysis::{Analysis, ResearchAnalyzer};
pub use budget::{
    format_learning, CharEstimator, ContextBudget, FittedContext, LengthEstimator, TokenEstimator,
};
pub use clarify::{ClarificationHandler, ClarificationStage, ClarifyOutcome, ClarifyingQuestion};
pub use config::{ResearchConfig, ResearchPrompts};
pub use dedup::{Deduplicator, LearningSet};
pub use error::ResearchError;
pub use events::{
    ClarificationInfo, ErrorInfo, LevelComplete, NodeProgress, ResearchEventExt, SynthesisInfo,
};
pub use executor::{QueryOutcome, SearchExecutor};
pub use extractor::{Extraction, LearningExtractor};
pub use limiter::CallLimiter;
pub use planner::{PlanInput, QueryPlanner};
pub use state::SharedState;
pub use synthesis::{ReportSynthesizer, SynthesisInput};
pub use types::{
    Clarifications, Learning, NodeState, OutputMode, ResearchNode, ResearchOutcome,
    ResearchRequest, RunStats, SearchQuery, DEFAULT_BREADTH, DEFAULT_DEPTH,
};
