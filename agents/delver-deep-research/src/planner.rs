//! Query planning.

use crate::config::{bullets, render, ResearchPrompts};
use crate::error::ResearchError;
use crate::limiter::CallLimiter;
use crate::state::SharedState;
use crate::types::SearchQuery;
use delver_core::{LlmClient, LlmRequest};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything one planning call sees
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    /// Effective research topic
    pub topic: &'a str,
    /// The node's own query (the topic itself at the root)
    pub seed: &'a str,
    /// Follow-up questions the parent extracted for this node
    pub follow_ups: &'a [String],
    /// Budget-fitted learnings gathered so far
    pub learnings: &'a str,
    pub history: &'a str,
    /// Maximum queries to return
    pub count: usize,
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    queries: Vec<SearchQuery>,
}

fn plan_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "queries": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "rationale": { "type": "string" }
                    },
                    "required": ["query", "rationale"]
                }
            }
        },
        "required": ["queries"]
    })
}

/// Generates search queries and reserves them against the run state
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    llm: LlmClient,
    limiter: CallLimiter,
    prompts: Arc<ResearchPrompts>,
}

impl QueryPlanner {
    pub fn new(llm: LlmClient, limiter: CallLimiter, prompts: Arc<ResearchPrompts>) -> Self {
        Self {
            llm,
            limiter,
            prompts,
        }
    }

    /// Plan at most `input.count` queries nobody in this run issued before.
    ///
    /// If the model repeats already-issued queries and too few remain, asks
    /// once more with an explicit exclusion list, then accepts whatever it
    /// has. The returned queries are already reserved in `state`.
    ///
    /// # Errors
    ///
    /// Fails only if the first planning call fails (or the run is
    /// cancelled). A failed retry keeps the queries from the first call.
    pub async fn plan(
        &self,
        input: PlanInput<'_>,
        state: &SharedState,
        token: &CancellationToken,
    ) -> Result<Vec<SearchQuery>, ResearchError> {
        if input.count == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .request(&input, input.count, &state.issued_queries(), token)
            .await?;
        let returned = candidates.len().min(input.count);
        let mut planned = state.reserve_queries(candidates, input.count);

        if planned.len() < returned && planned.len() < input.count {
            log::debug!(
                "Planner repeated {} issued queries for '{}', retrying with exclusions",
                returned - planned.len(),
                input.seed
            );
            let remaining = input.count - planned.len();
            match self
                .request(&input, remaining, &state.issued_queries(), token)
                .await
            {
                Ok(more) => planned.extend(state.reserve_queries(more, remaining)),
                Err(ResearchError::Cancelled) => return Err(ResearchError::Cancelled),
                Err(e) => log::warn!("Planner retry failed, keeping {} queries: {}", planned.len(), e),
            }
        }

        Ok(planned)
    }

    async fn request(
        &self,
        input: &PlanInput<'_>,
        count: usize,
        exclude: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<SearchQuery>, ResearchError> {
        let count_text = count.to_string();
        let follow_ups = bullets(input.follow_ups);
        let exclude = bullets(exclude);
        let prompt = render(
            &self.prompts.planning_template,
            &[
                ("topic", input.topic),
                ("seed", input.seed),
                ("follow_ups", follow_ups.as_str()),
                ("learnings", non_empty(input.learnings)),
                ("history", input.history),
                ("count", count_text.as_str()),
                ("exclude", exclude.as_str()),
            ],
        );
        let request = LlmRequest::new(prompt)
            .with_system_instruction(self.prompts.planning_system.clone())
            .with_response_format(plan_schema())
            .with_label("planning");

        let _permit = self
            .limiter
            .acquire(token)
            .await
            .ok_or(ResearchError::Cancelled)?;
        let response: PlanResponse = self.llm.generate_json(request, token).await?;

        Ok(sanitize(response.queries))
    }
}

fn non_empty(text: &str) -> &str {
    if text.trim().is_empty() {
        "(none)"
    } else {
        text
    }
}

/// Trim queries and drop the blank ones.
fn sanitize(queries: Vec<SearchQuery>) -> Vec<SearchQuery> {
    queries
        .into_iter()
        .filter_map(|q| {
            let query = q.query.trim();
            if query.is_empty() {
                return None;
            }
            Some(SearchQuery::new(query, q.rationale.trim()))
        })
        .collect()
}
