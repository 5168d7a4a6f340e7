//! Learning extraction from search results.

use crate::budget::ContextBudget;
use crate::config::{render, ResearchPrompts};
use crate::error::ResearchError;
use crate::limiter::CallLimiter;
use crate::types::{Learning, SearchQuery};
use delver_core::{normalize_text, normalize_url, LlmClient, LlmRequest, SearchResult};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Learnings and follow-up questions drawn from one query's results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub learnings: Vec<Learning>,
    /// Seeds for the next level's planner; not queries themselves
    pub follow_ups: Vec<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.learnings.is_empty() && self.follow_ups.is_empty()
    }
}

/// A learning as the model returns it; bare strings are accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLearning {
    Cited {
        text: String,
        #[serde(default)]
        sources: Vec<String>,
    },
    Text(String),
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    learnings: Vec<RawLearning>,
    #[serde(default)]
    follow_up_questions: Vec<String>,
}

fn extraction_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "learnings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "sources": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["text", "sources"]
                }
            },
            "follow_up_questions": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["learnings", "follow_up_questions"]
    })
}

/// Turns a query's results into atomic, cited learnings
#[derive(Debug, Clone)]
pub struct LearningExtractor {
    llm: LlmClient,
    limiter: CallLimiter,
    prompts: Arc<ResearchPrompts>,
    /// Measures result bodies; its ceiling is the whole-call content budget
    budget: ContextBudget,
    max_learnings: usize,
    max_follow_ups: usize,
    history: String,
}

impl LearningExtractor {
    pub fn new(
        llm: LlmClient,
        limiter: CallLimiter,
        prompts: Arc<ResearchPrompts>,
        budget: ContextBudget,
    ) -> Self {
        Self {
            llm,
            limiter,
            prompts,
            budget,
            max_learnings: 5,
            max_follow_ups: 3,
            history: "(none)".to_string(),
        }
    }

    /// Prior conversation text shown alongside the results
    #[must_use]
    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.history = history.into();
        self
    }

    #[must_use]
    pub fn with_limits(mut self, max_learnings: usize, max_follow_ups: usize) -> Self {
        self.max_learnings = max_learnings;
        self.max_follow_ups = max_follow_ups;
        self
    }

    /// Extract learnings from `results`.
    ///
    /// Empty `results` return an empty extraction without a model call.
    /// Citations are restricted to the URLs of `results`.
    pub async fn extract(
        &self,
        query: &SearchQuery,
        results: &[SearchResult],
        token: &CancellationToken,
    ) -> Result<Extraction, ResearchError> {
        if results.is_empty() {
            return Ok(Extraction::default());
        }

        let max_learnings = self.max_learnings.to_string();
        let max_follow_ups = self.max_follow_ups.to_string();
        let serialized = self.serialize_results(results);
        let prompt = render(
            &self.prompts.extraction_template,
            &[
                ("query", query.query.as_str()),
                ("results", serialized.as_str()),
                ("max_learnings", max_learnings.as_str()),
                ("max_follow_ups", max_follow_ups.as_str()),
                ("history", self.history.as_str()),
            ],
        );
        let request = LlmRequest::new(prompt)
            .with_system_instruction(self.prompts.extraction_system.clone())
            .with_response_format(extraction_schema())
            .with_label("extraction");

        let _permit = self
            .limiter
            .acquire(token)
            .await
            .ok_or(ResearchError::Cancelled)?;
        let response: ExtractionResponse = self.llm.generate_json(request, token).await?;

        Ok(self.clean(response, results))
    }

    /// Serialize every result, clipping each body to an equal share of the budget.
    fn serialize_results(&self, results: &[SearchResult]) -> String {
        let share = (self.budget.max() / results.len()).max(1);

        results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut block = format!("[{}] {}\nURL: {}\n", i + 1, r.title.trim(), r.url);
                if let Some(answer) = r.direct_answer.as_deref().filter(|a| !a.trim().is_empty()) {
                    block.push_str(&format!("Provider answer: {}\n", answer.trim()));
                }
                if !r.follow_up_questions.is_empty() {
                    block.push_str(&format!(
                        "Related questions: {}\n",
                        r.follow_up_questions.join(" | ")
                    ));
                }
                block.push_str("Content: ");
                block.push_str(&self.budget.clip(&r.content, share));
                block
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn clean(&self, response: ExtractionResponse, results: &[SearchResult]) -> Extraction {
        let known: HashMap<String, &str> = results
            .iter()
            .map(|r| (normalize_url(&r.url), r.url.as_str()))
            .collect();

        let learnings = response
            .learnings
            .into_iter()
            .filter_map(|raw| {
                let (text, sources) = match raw {
                    RawLearning::Cited { text, sources } => (text, sources),
                    RawLearning::Text(text) => (text, Vec::new()),
                };
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                let mut cited: Vec<String> = Vec::new();
                for source in sources {
                    match known.get(&normalize_url(&source)) {
                        Some(url) if !cited.iter().any(|c| c == url) => cited.push((*url).to_string()),
                        Some(_) => {}
                        None => log::debug!("Dropping citation of unknown source '{}'", source),
                    }
                }
                Some(Learning::new(text).with_sources(cited))
            })
            .take(self.max_learnings)
            .collect();

        let mut seen = Vec::new();
        let follow_ups = response
            .follow_up_questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| {
                let key = normalize_text(q);
                if key.is_empty() || seen.contains(&key) {
                    return false;
                }
                seen.push(key);
                true
            })
            .take(self.max_follow_ups)
            .collect();

        Extraction {
            learnings,
            follow_ups,
        }
    }
}
