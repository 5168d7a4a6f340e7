//! Final report and answer synthesis.

use crate::budget::{ContextBudget, FittedContext};
use crate::config::{bullets, render, ResearchPrompts};
use crate::error::ResearchError;
use crate::limiter::CallLimiter;
use crate::types::{Learning, OutputMode};
use delver_core::{LlmClient, LlmRequest};
use std::sync::Arc;

/// Inputs of the single synthesis call
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub topic: &'a str,
    /// Learnings already fitted with [`ReportSynthesizer::fit`]
    pub context: &'a FittedContext,
    pub sources: &'a [String],
    /// Open questions from the final analysis
    pub gaps: &'a [String],
    pub mode: OutputMode,
    pub history: &'a str,
}

/// Writes the concise answer or long-form report
#[derive(Debug, Clone)]
pub struct ReportSynthesizer {
    llm: LlmClient,
    limiter: CallLimiter,
    prompts: Arc<ResearchPrompts>,
    budget: ContextBudget,
}

impl ReportSynthesizer {
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
        }
    }

    /// Learnings as they will appear in the prompt.
    pub fn fit(&self, learnings: &[Learning]) -> FittedContext {
        self.budget.fit_learnings(learnings)
    }

    /// Produce the final output in one model call.
    ///
    /// Runs even after cancellation so that partial research still yields a
    /// report. There is no fallback: any failure, including an empty
    /// response, is [`ResearchError::SynthesisFailed`].
    pub async fn synthesize(&self, input: SynthesisInput<'_>) -> Result<String, ResearchError> {
        let template = match input.mode {
            OutputMode::Report => &self.prompts.report_template,
            OutputMode::Concise => &self.prompts.answer_template,
        };
        let learnings = if input.context.text.is_empty() {
            "(none)"
        } else {
            input.context.text.as_str()
        };
        let sources = bullets(input.sources);
        let gaps = bullets(input.gaps);
        let prompt = render(
            template,
            &[
                ("topic", input.topic),
                ("learnings", learnings),
                ("sources", sources.as_str()),
                ("gaps", gaps.as_str()),
                ("history", input.history),
            ],
        );
        let request = LlmRequest::new(prompt)
            .with_system_instruction(self.prompts.synthesis_system.clone())
            .with_label("synthesis");

        let _permit = self
            .limiter
            .acquire_uncancellable()
            .await
            .ok_or_else(|| ResearchError::SynthesisFailed("call limiter closed".to_string()))?;
        let response = self
            .llm
            .generate(request)
            .await
            .map_err(|e| ResearchError::SynthesisFailed(e.to_string()))?;

        let text = response.text.trim().to_string();
        if text.is_empty() {
            return Err(ResearchError::SynthesisFailed(
                "Empty synthesis response".to_string(),
            ));
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delver_core::mock::MockLlm;
    use delver_core::{LlmConfig, LlmError};

    fn synthesizer(mock: &MockLlm, budget: usize) -> ReportSynthesizer {
        let llm = LlmClient::new(Arc::new(mock.clone()), LlmConfig::default().with_max_retries(0));
        ReportSynthesizer::new(
            llm,
            CallLimiter::new(1),
            Arc::new(ResearchPrompts::default()),
            ContextBudget::chars(budget),
        )
    }

    fn input(context: &FittedContext, mode: OutputMode) -> SynthesisInput<'_> {
        SynthesisInput {
            topic: "rust",
            context,
            sources: &[],
            gaps: &[],
            mode,
            history: "(none)",
        }
    }

    #[tokio::test]
    async fn test_mode_selects_template() {
        let mock = MockLlm::text("done");
        let synth = synthesizer(&mock, 1000);
        let context = synth.fit(&[Learning::new("fact")]);

        synth.synthesize(input(&context, OutputMode::Report)).await.unwrap();
        synth.synthesize(input(&context, OutputMode::Concise)).await.unwrap();

        let calls = mock.calls();
        assert!(calls[0].prompt.contains("research report"));
        assert!(calls[1].prompt.contains("concise, direct answer"));
        assert!(calls.iter().all(|c| c.label == "synthesis"));
    }

    #[tokio::test]
    async fn test_prompt_respects_budget() {
        let mock = MockLlm::text("report");
        let learnings: Vec<_> = (0..20)
            .map(|i| Learning::new(format!("Learning number {}", i)))
            .collect();

        let synth = synthesizer(&mock, 100);
        let context = synth.fit(&learnings);
        synth
            .synthesize(input(&context, OutputMode::Report))
            .await
            .unwrap();

        assert!(context.dropped > 0);
        let prompt = &mock.calls()[0].prompt;
        assert!(prompt.contains("Learning number 19"));
        assert!(!prompt.contains("Learning number 0\n"));
    }

    #[tokio::test]
    async fn test_report_lists_gaps() {
        let mock = MockLlm::text("report");
        let synth = synthesizer(&mock, 1000);
        let context = synth.fit(&[Learning::new("fact")]);
        let gaps = vec!["Long-term effects unknown".to_string()];

        synth
            .synthesize(SynthesisInput {
                gaps: &gaps,
                ..input(&context, OutputMode::Report)
            })
            .await
            .unwrap();

        let prompt = &mock.calls()[0].prompt;
        assert!(prompt.contains("- Long-term effects unknown"));
        assert!(!prompt.contains("{gaps}"));
    }

    #[tokio::test]
    async fn test_runs_with_zero_learnings() {
        let mock = MockLlm::text("nothing found");
        let synth = synthesizer(&mock, 100);
        let text = synth
            .synthesize(input(&synth.fit(&[]), OutputMode::Concise))
            .await
            .unwrap();

        assert_eq!(text, "nothing found");
        assert!(mock.calls()[0].prompt.contains("Learnings:\n(none)"));
    }

    #[tokio::test]
    async fn test_failure_is_synthesis_failed() {
        let mock = MockLlm::new(|_| Err(LlmError::Auth("revoked".into())));
        let synth = synthesizer(&mock, 100);
        let err = synth
            .synthesize(input(&synth.fit(&[]), OutputMode::Report))
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::SynthesisFailed(_)));
        assert!(err.to_string().contains("revoked"));
    }

    #[tokio::test]
    async fn test_blank_response_is_failure() {
        let mock = MockLlm::text("   ");
        let synth = synthesizer(&mock, 100);
        let err = synth
            .synthesize(input(&synth.fit(&[]), OutputMode::Report))
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::SynthesisFailed(_)));
    }
}
