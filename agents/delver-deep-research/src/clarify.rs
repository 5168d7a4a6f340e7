//! Clarification stage.
//!
//! Runs once per research run and emits exactly one `clarifying` event.
//! Every failure here degrades to researching the topic as given.

use crate::config::{bullets, render, ResearchPrompts};
use crate::error::ResearchError;
use crate::events::{self, ClarificationInfo};
use crate::limiter::CallLimiter;
use crate::types::{Clarifications, ResearchRequest};
use async_trait::async_trait;
use delver_core::{LlmClient, LlmRequest, ProgressSink};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A question the model wants answered before research starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyingQuestion {
    /// Short identifier answers are keyed by
    pub key: String,
    pub question: String,
    /// Answer assumed when the user gives none
    #[serde(default)]
    pub default: String,
}

/// Collects answers to clarifying questions, typically from a user
///
/// Answers are keyed by [`ClarifyingQuestion::key`]. Missing or blank answers
/// fall back to each question's default.
#[async_trait]
pub trait ClarificationHandler: Send + Sync {
    async fn answer(&self, topic: &str, questions: &[ClarifyingQuestion]) -> BTreeMap<String, String>;
}

/// Result of the clarification stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarifyOutcome {
    /// Research `topic`, recording the assumptions made
    Proceed {
        topic: String,
        assumptions: Vec<String>,
    },
    /// The request needs no search; `answer` is final
    DirectAnswer { topic: String, answer: String },
}

impl ClarifyOutcome {
    pub fn topic(&self) -> &str {
        match self {
            ClarifyOutcome::Proceed { topic, .. } | ClarifyOutcome::DirectAnswer { topic, .. } => {
                topic
            }
        }
    }

    fn unmodified(topic: &str) -> Self {
        ClarifyOutcome::Proceed {
            topic: topic.to_string(),
            assumptions: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuestionsResponse {
    #[serde(default = "default_true")]
    needs_clarification: bool,
    #[serde(default)]
    questions: Vec<ClarifyingQuestion>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RefineResponse {
    #[serde(default)]
    refined_query: String,
    #[serde(default)]
    assumptions: Vec<String>,
    #[serde(default = "default_true")]
    requires_search: bool,
    #[serde(default)]
    direct_answer: Option<String>,
}

fn questions_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "needs_clarification": { "type": "boolean" },
            "questions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "key": { "type": "string" },
                        "question": { "type": "string" },
                        "default": { "type": "string" }
                    },
                    "required": ["key", "question", "default"]
                }
            }
        },
        "required": ["needs_clarification", "questions"]
    })
}

fn refine_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "refined_query": { "type": "string" },
            "assumptions": { "type": "array", "items": { "type": "string" } },
            "requires_search": { "type": "boolean" },
            "direct_answer": { "type": "string" }
        },
        "required": ["refined_query", "assumptions", "requires_search"]
    })
}

/// Append answers to the topic as a "Clarifications:" block.
fn merge_answers<'a>(topic: &str, answers: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let lines: Vec<String> = answers
        .into_iter()
        .filter(|(_, a)| !a.trim().is_empty())
        .map(|(q, a)| format!("- {}: {}", q.trim(), a.trim()))
        .collect();
    if lines.is_empty() {
        return topic.to_string();
    }
    format!("{}\n\nClarifications:\n{}", topic.trim(), lines.join("\n"))
}

/// Asks clarifying questions and refines the topic with the answers
#[derive(Debug, Clone)]
pub struct ClarificationStage {
    llm: LlmClient,
    limiter: CallLimiter,
    prompts: Arc<ResearchPrompts>,
    max_questions: usize,
}

impl ClarificationStage {
    pub fn new(
        llm: LlmClient,
        limiter: CallLimiter,
        prompts: Arc<ResearchPrompts>,
        max_questions: usize,
    ) -> Self {
        Self {
            llm,
            limiter,
            prompts,
            max_questions,
        }
    }

    /// Resolve the effective topic for `request`.
    ///
    /// Never fails: model errors and cancellation fall back to the topic as
    /// submitted. Exactly one `clarifying` event is emitted.
    pub async fn run(
        &self,
        request: &ResearchRequest,
        handler: Option<&dyn ClarificationHandler>,
        sink: &ProgressSink,
        token: &CancellationToken,
    ) -> ClarifyOutcome {
        let topic = request.topic.trim();

        let (outcome, info) = match &request.clarifications {
            Clarifications::SkipAll => (
                ClarifyOutcome::unmodified(topic),
                skipped(topic, "skip requested"),
            ),
            Clarifications::Answers(answers) if answers.is_empty() => (
                ClarifyOutcome::unmodified(topic),
                skipped(topic, "no answers supplied"),
            ),
            Clarifications::Answers(answers) => {
                // Supplied answers stand in for questions; the topic stays as given.
                let assumptions: Vec<String> = answers
                    .iter()
                    .filter(|(_, a)| !a.trim().is_empty())
                    .map(|(k, a)| format!("{}: {}", k.trim(), a.trim()))
                    .collect();
                let info = ClarificationInfo {
                    assumptions: assumptions.clone(),
                    ..skipped(topic, "answers supplied")
                };
                let outcome = ClarifyOutcome::Proceed {
                    topic: topic.to_string(),
                    assumptions,
                };
                (outcome, info)
            }
            Clarifications::Ask if self.max_questions == 0 => (
                ClarifyOutcome::unmodified(topic),
                skipped(topic, "clarification disabled"),
            ),
            Clarifications::Ask => self.ask(request, handler, token).await,
        };

        sink.emit(events::clarifying(&info));
        outcome
    }

    async fn ask(
        &self,
        request: &ResearchRequest,
        handler: Option<&dyn ClarificationHandler>,
        token: &CancellationToken,
    ) -> (ClarifyOutcome, ClarificationInfo) {
        let topic = request.topic.trim();

        let questions = match self.questions(request, token).await {
            Ok(questions) => questions,
            Err(e) => {
                if !e.is_cancelled() {
                    log::warn!("Clarifying questions failed, using topic as given: {}", e);
                }
                return (
                    ClarifyOutcome::unmodified(topic),
                    skipped(topic, &format!("clarification unavailable: {}", e)),
                );
            }
        };

        if questions.is_empty() {
            let info = ClarificationInfo {
                skipped: false,
                reason: Some("no clarification needed".to_string()),
                questions,
                topic: topic.to_string(),
                assumptions: Vec::new(),
                direct_answer: false,
            };
            return (ClarifyOutcome::unmodified(topic), info);
        }

        let answers = match handler {
            Some(handler) => tokio::select! {
                biased;
                _ = token.cancelled() => BTreeMap::new(),
                answers = handler.answer(topic, &questions) => answers,
            },
            None => BTreeMap::new(),
        };

        // Resolve each question to the user's answer or its default.
        let mut answered = Vec::new();
        let mut defaults = Vec::new();
        for q in &questions {
            let given = answers
                .get(&q.key)
                .or_else(|| answers.get(&q.question))
                .map(|a| a.trim())
                .filter(|a| !a.is_empty());
            match given {
                Some(answer) => answered.push((q.question.as_str(), answer)),
                None if !q.default.trim().is_empty() => {
                    defaults.push((q.question.as_str(), q.default.trim()))
                }
                None => {}
            }
        }
        let mut assumptions: Vec<String> = defaults
            .iter()
            .map(|(q, d)| format!("{} {}", q, d))
            .collect();

        let outcome = match self.refine(request, &answered, &defaults, token).await {
            Ok(refined) => {
                for assumption in refined.assumptions {
                    let assumption = assumption.trim().to_string();
                    if !assumption.is_empty() && !assumptions.contains(&assumption) {
                        assumptions.push(assumption);
                    }
                }
                let refined_topic = if refined.refined_query.trim().is_empty() {
                    merge_answers(topic, answered.iter().chain(defaults.iter()).copied())
                } else {
                    refined.refined_query.trim().to_string()
                };
                match refined.direct_answer.filter(|a| !a.trim().is_empty()) {
                    Some(answer) if !refined.requires_search => ClarifyOutcome::DirectAnswer {
                        topic: refined_topic,
                        answer: answer.trim().to_string(),
                    },
                    _ => ClarifyOutcome::Proceed {
                        topic: refined_topic,
                        assumptions: assumptions.clone(),
                    },
                }
            }
            Err(e) => {
                if !e.is_cancelled() {
                    log::warn!("Topic refinement failed, merging answers directly: {}", e);
                }
                ClarifyOutcome::Proceed {
                    topic: merge_answers(topic, answered.iter().chain(defaults.iter()).copied()),
                    assumptions: assumptions.clone(),
                }
            }
        };

        let info = ClarificationInfo {
            skipped: false,
            reason: None,
            questions,
            topic: outcome.topic().to_string(),
            assumptions,
            direct_answer: matches!(outcome, ClarifyOutcome::DirectAnswer { .. }),
        };
        (outcome, info)
    }

    async fn questions(
        &self,
        request: &ResearchRequest,
        token: &CancellationToken,
    ) -> Result<Vec<ClarifyingQuestion>, ResearchError> {
        let max = self.max_questions.to_string();
        let prompt = render(
            &self.prompts.clarify_template,
            &[
                ("topic", request.topic.trim()),
                ("max", max.as_str()),
                ("history", request.history()),
            ],
        );
        let llm_request = LlmRequest::new(prompt)
            .with_system_instruction(self.prompts.clarify_system.clone())
            .with_response_format(questions_schema())
            .with_label("clarify");

        let _permit = self
            .limiter
            .acquire(token)
            .await
            .ok_or(ResearchError::Cancelled)?;
        let response: QuestionsResponse = self.llm.generate_json(llm_request, token).await?;

        if !response.needs_clarification {
            return Ok(Vec::new());
        }
        Ok(response
            .questions
            .into_iter()
            .filter(|q| !q.question.trim().is_empty())
            .enumerate()
            .map(|(i, q)| ClarifyingQuestion {
                key: if q.key.trim().is_empty() {
                    format!("q{}", i + 1)
                } else {
                    q.key.trim().to_string()
                },
                question: q.question.trim().to_string(),
                default: q.default.trim().to_string(),
            })
            .take(self.max_questions)
            .collect())
    }

    async fn refine(
        &self,
        request: &ResearchRequest,
        answered: &[(&str, &str)],
        defaults: &[(&str, &str)],
        token: &CancellationToken,
    ) -> Result<RefineResponse, ResearchError> {
        let format = |pairs: &[(&str, &str)]| {
            bullets(
                &pairs
                    .iter()
                    .map(|(q, a)| format!("{} {}", q, a))
                    .collect::<Vec<_>>(),
            )
        };
        let answers = format(answered);
        let unanswered = format(defaults);
        let prompt = render(
            &self.prompts.refine_template,
            &[
                ("topic", request.topic.trim()),
                ("answers", answers.as_str()),
                ("unanswered", unanswered.as_str()),
                ("history", request.history()),
            ],
        );
        let llm_request = LlmRequest::new(prompt)
            .with_system_instruction(self.prompts.clarify_system.clone())
            .with_response_format(refine_schema())
            .with_label("refine");

        let _permit = self
            .limiter
            .acquire(token)
            .await
            .ok_or(ResearchError::Cancelled)?;
        Ok(self.llm.generate_json(llm_request, token).await?)
    }
}

fn skipped(topic: &str, reason: &str) -> ClarificationInfo {
    ClarificationInfo {
        skipped: true,
        reason: Some(reason.to_string()),
        questions: Vec::new(),
        topic: topic.to_string(),
        assumptions: Vec::new(),
        direct_answer: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ResearchEventExt;
    use delver_core::mock::MockLlm;
    use delver_core::{LlmConfig, LlmError, ProgressEvent, Stage};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct FixedAnswers(BTreeMap<String, String>);

    #[async_trait]
    impl ClarificationHandler for FixedAnswers {
        async fn answer(&self, _topic: &str, _questions: &[ClarifyingQuestion]) -> BTreeMap<String, String> {
            self.0.clone()
        }
    }

    fn stage(mock: &MockLlm) -> ClarificationStage {
        let llm = LlmClient::new(Arc::new(mock.clone()), LlmConfig::default().with_max_retries(0));
        ClarificationStage::new(llm, CallLimiter::new(1), Arc::new(ResearchPrompts::default()), 3)
    }

    fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn questions_json() -> String {
        json!({
            "needs_clarification": true,
            "questions": [
                { "key": "era", "question": "Which era?", "default": "modern" },
                { "key": "region", "question": "Which region?", "default": "global" }
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_skip_all_keeps_topic_and_emits_one_event() {
        let mock = MockLlm::text("{}");
        let (sink, mut rx) = ProgressSink::channel();
        let request = ResearchRequest::new("  history of rust ").skip_clarification();

        let outcome = stage(&mock)
            .run(&request, None, &sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ClarifyOutcome::unmodified("history of rust"));
        assert_eq!(mock.call_count(), 0);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, Stage::Clarifying);
        assert!(events[0].as_clarification().unwrap().skipped);
    }

    #[tokio::test]
    async fn test_supplied_answers_keep_topic_unmodified() {
        let mock = MockLlm::text("{}");
        let (sink, mut rx) = ProgressSink::channel();
        let request = ResearchRequest::new(" energy prices ").with_answers(BTreeMap::from([
            ("region".to_string(), "EU".to_string()),
            ("period".to_string(), " ".to_string()),
        ]));

        let outcome = stage(&mock)
            .run(&request, None, &sink, &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            ClarifyOutcome::Proceed {
                topic: "energy prices".to_string(),
                assumptions: vec!["region: EU".to_string()],
            }
        );
        assert_eq!(mock.call_count(), 0);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let info = events[0].as_clarification().unwrap();
        assert!(info.skipped);
        assert_eq!(info.topic, "energy prices");
        assert_eq!(info.assumptions, vec!["region: EU".to_string()]);
    }

    #[tokio::test]
    async fn test_questions_failure_degrades_to_topic() {
        let mock = MockLlm::new(|_| Err(LlmError::Auth("bad key".into())));
        let (sink, mut rx) = ProgressSink::channel();

        let outcome = stage(&mock)
            .run(&ResearchRequest::new("topic"), None, &sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ClarifyOutcome::unmodified("topic"));
        let info = drain(&mut rx)[0].as_clarification().unwrap();
        assert!(info.reason.unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_no_questions_needed() {
        let mock = MockLlm::text(r#"{"needs_clarification": false, "questions": []}"#);
        let (sink, _rx) = ProgressSink::channel();

        let outcome = stage(&mock)
            .run(&ResearchRequest::new("topic"), None, &sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ClarifyOutcome::unmodified("topic"));
        assert_eq!(mock.calls_with_label("refine"), 0);
    }

    #[tokio::test]
    async fn test_answers_and_defaults_refined() {
        let mock = MockLlm::new(|req| {
            Ok(match req.label.as_str() {
                "clarify" => questions_json(),
                _ => json!({
                    "refined_query": "Rust adoption in Europe since 2015",
                    "assumptions": ["Focus on industry"],
                    "requires_search": true
                })
                .to_string(),
            })
        });
        let handler = FixedAnswers(BTreeMap::from([("region".to_string(), "Europe".to_string())]));
        let (sink, mut rx) = ProgressSink::channel();

        let outcome = stage(&mock)
            .run(
                &ResearchRequest::new("rust adoption"),
                Some(&handler),
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            outcome,
            ClarifyOutcome::Proceed {
                topic: "Rust adoption in Europe since 2015".to_string(),
                assumptions: vec!["Which era? modern".to_string(), "Focus on industry".to_string()],
            }
        );
        let refine_prompt = &mock.calls()[1].prompt;
        assert!(refine_prompt.contains("- Which region? Europe"));
        assert!(refine_prompt.contains("- Which era? modern"));

        let info = drain(&mut rx)[0].as_clarification().unwrap();
        assert_eq!(info.questions.len(), 2);
        assert!(!info.skipped);
    }

    #[tokio::test]
    async fn test_refine_failure_merges_deterministically() {
        let mock = MockLlm::new(|req| match req.label.as_str() {
            "clarify" => Ok(questions_json()),
            _ => Err(LlmError::InvalidRequest("nope".into())),
        });
        let (sink, _rx) = ProgressSink::channel();

        let outcome = stage(&mock)
            .run(&ResearchRequest::new("rust adoption"), None, &sink, &CancellationToken::new())
            .await;

        assert_eq!(
            outcome.topic(),
            "rust adoption\n\nClarifications:\n- Which era?: modern\n- Which region?: global"
        );
    }

    #[tokio::test]
    async fn test_direct_answer_short_circuit() {
        let mock = MockLlm::new(|req| {
            Ok(match req.label.as_str() {
                "clarify" => questions_json(),
                _ => json!({
                    "refined_query": "What is 2 + 2?",
                    "assumptions": [],
                    "requires_search": false,
                    "direct_answer": "4"
                })
                .to_string(),
            })
        });
        let (sink, mut rx) = ProgressSink::channel();

        let outcome = stage(&mock)
            .run(&ResearchRequest::new("2+2?"), None, &sink, &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            ClarifyOutcome::DirectAnswer {
                topic: "What is 2 + 2?".to_string(),
                answer: "4".to_string()
            }
        );
        assert!(drain(&mut rx)[0].as_clarification().unwrap().direct_answer);
    }
}
