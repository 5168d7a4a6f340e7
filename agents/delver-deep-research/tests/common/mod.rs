//! Shared test utilities for integration tests

#![allow(dead_code)]

use delver_core::mock::{CallCounter, MockLlm, MockSearch};
use delver_core::{
    LlmClient, LlmConfig, LlmError, OpenAiBackend, ProgressEvent, ProgressSink, SearchRegistry,
    SearchSource, TavilyProvider,
};
use delver_deep_research::{DeepResearcher, ResearchContext, ResearchError, ResearchOutcome, ResearchRequest};
use serde_json::json;
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// First line of `prompt` starting with `prefix`, with the prefix removed.
pub fn line_after<'a>(prompt: &'a str, prefix: &str) -> Option<&'a str> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(prefix))
        .map(str::trim)
}

/// Query count the planner asked for.
pub fn requested_count(prompt: &str) -> usize {
    prompt
        .split("Generate at most ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

/// Planning response: `count` queries named after the node's seed.
pub fn plan_response(prompt: &str) -> String {
    let seed = line_after(prompt, "Current line of inquiry:").unwrap_or("topic");
    let queries: Vec<_> = (0..requested_count(prompt))
        .map(|i| json!({ "query": format!("{} aspect {}", seed, i), "rationale": "coverage" }))
        .collect();
    json!({ "queries": queries }).to_string()
}

/// Extraction response: one cited learning per result URL plus one follow-up.
pub fn extraction_response(prompt: &str) -> String {
    let query = line_after(prompt, "Search query:").unwrap_or("query");
    let learnings: Vec<_> = prompt
        .lines()
        .filter_map(|line| line.strip_prefix("URL: "))
        .map(|url| json!({ "text": format!("Fact from {}", url.trim()), "sources": [url.trim()] }))
        .collect();
    json!({
        "learnings": learnings,
        "follow_up_questions": [format!("What else about {}?", query)]
    })
    .to_string()
}

/// Analysis response with one finding, gap and recommendation for the topic.
pub fn analysis_response(prompt: &str) -> String {
    let topic = line_after(prompt, "Research topic:").unwrap_or("topic");
    json!({
        "findings": [format!("Overall finding on {}", topic)],
        "gaps": [format!("Open gap on {}", topic)],
        "recommendations": [format!("Next step on {}", topic)]
    })
    .to_string()
}

/// Model double for a full run: plans, extracts, never asks clarifying
/// questions, analyzes, and writes a fixed report.
pub fn scripted_llm() -> MockLlm {
    MockLlm::new(|req| {
        Ok(match req.label.as_str() {
            "planning" => plan_response(&req.prompt),
            "extraction" => extraction_response(&req.prompt),
            "analysis" => analysis_response(&req.prompt),
            "clarify" => json!({ "needs_clarification": false, "questions": [] }).to_string(),
            "synthesis" => "FINAL REPORT".to_string(),
            other => return Err(LlmError::Other(format!("unexpected label {}", other))),
        })
    })
}

pub fn fast_llm_config() -> LlmConfig {
    LlmConfig::default()
        .with_max_retries(0)
        .with_timeout(Duration::from_secs(5))
}

/// Mock collaborators sharing one concurrency instrument.
pub struct Harness {
    pub llm: MockLlm,
    pub search: MockSearch,
    pub counter: CallCounter,
}

impl Harness {
    pub fn new(llm: MockLlm, search: MockSearch) -> Self {
        let counter = CallCounter::new();
        Self {
            llm: llm.with_counter(counter.clone()),
            search: search.with_counter(counter.clone()),
            counter,
        }
    }

    pub fn scripted() -> Self {
        Self::new(scripted_llm(), MockSearch::new())
    }

    pub fn context(&self) -> ResearchContext {
        ResearchContext::new(
            LlmClient::new(Arc::new(self.llm.clone()), fast_llm_config()),
            SearchRegistry::new().with_provider(SearchSource::Serper, Arc::new(self.search.clone())),
        )
    }
}

/// Run to completion, returning the result and every event emitted.
pub async fn run_collect(
    researcher: &DeepResearcher,
    request: ResearchRequest,
    context: &ResearchContext,
) -> (Result<ResearchOutcome, ResearchError>, Vec<ProgressEvent>) {
    let (sink, mut rx) = ProgressSink::channel();
    let result = researcher.run(request, context, &sink).await;
    drop(sink);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

/// Helper to get live API keys, or None if not available.
pub fn get_api_keys() -> Option<(String, String)> {
    Some((env::var("OPENAI_API_KEY").ok()?, env::var("TAVILY_API_KEY").ok()?))
}

/// Context backed by the real OpenAI and Tavily APIs.
pub fn create_live_context(openai_key: &str, tavily_key: &str) -> ResearchContext {
    let backend = OpenAiBackend::new(openai_key).expect("valid OpenAI key");
    let tavily = TavilyProvider::new(tavily_key, Duration::from_secs(30)).expect("valid Tavily key");
    let config = LlmConfig::default()
        .with_timeout(Duration::from_secs(90))
        .with_max_retries(1)
        .with_retry_base_delay_ms(500);

    ResearchContext::new(
        LlmClient::new(Arc::new(backend), config),
        SearchRegistry::new().with_provider(SearchSource::Tavily, Arc::new(tavily)),
    )
}
