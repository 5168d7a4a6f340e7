//! Final analysis over everything learned.
//!
//! One structured call after the tree is done. Its findings are folded back
//! into the learnings; gaps and recommendations travel with the outcome.

use crate::budget::FittedContext;
use crate::config::{render, ResearchPrompts};
use crate::error::ResearchError;
use crate::limiter::CallLimiter;
use delver_core::{LlmClient, LlmRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cross-cutting conclusions drawn from the accumulated learnings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    /// Key findings, each a self-contained statement
    #[serde(default)]
    pub findings: Vec<String>,
    /// Questions the research left open
    #[serde(default)]
    pub gaps: Vec<String>,
    /// Suggested next steps
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Analysis {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty() && self.gaps.is_empty() && self.recommendations.is_empty()
    }

    fn cleaned(self) -> Self {
        let clean = |items: Vec<String>| -> Vec<String> {
            let mut out: Vec<String> = Vec::new();
            for item in items {
                let item = item.trim();
                if !item.is_empty() && !out.iter().any(|o| o == item) {
                    out.push(item.to_string());
                }
            }
            out
        };
        Self {
            findings: clean(self.findings),
            gaps: clean(self.gaps),
            recommendations: clean(self.recommendations),
        }
    }
}

fn analysis_schema() -> serde_json::Value {
    let list = json!({ "type": "array", "items": { "type": "string" } });
    json!({
        "type": "object",
        "properties": {
            "findings": list,
            "gaps": list,
            "recommendations": list
        },
        "required": ["findings", "gaps", "recommendations"]
    })
}

/// Summarizes the research into findings, gaps and recommendations
#[derive(Debug, Clone)]
pub struct ResearchAnalyzer {
    llm: LlmClient,
    limiter: CallLimiter,
    prompts: Arc<ResearchPrompts>,
}

impl ResearchAnalyzer {
    pub fn new(llm: LlmClient, limiter: CallLimiter, prompts: Arc<ResearchPrompts>) -> Self {
        Self {
            llm,
            limiter,
            prompts,
        }
    }

    /// Analyze fitted learnings for `topic`.
    ///
    /// Items are trimmed and de-duplicated; blank items are dropped.
    pub async fn analyze(
        &self,
        topic: &str,
        context: &FittedContext,
        history: &str,
        token: &CancellationToken,
    ) -> Result<Analysis, ResearchError> {
        let prompt = render(
            &self.prompts.analysis_template,
            &[
                ("topic", topic),
                ("learnings", context.text.as_str()),
                ("history", history),
            ],
        );
        let request = LlmRequest::new(prompt)
            .with_system_instruction(self.prompts.analysis_system.clone())
            .with_response_format(analysis_schema())
            .with_label("analysis");

        let _permit = self
            .limiter
            .acquire(token)
            .await
            .ok_or(ResearchError::Cancelled)?;
        let analysis: Analysis = self.llm.generate_json(request, token).await?;

        Ok(analysis.cleaned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::ContextBudget;
    use crate::types::Learning;
    use delver_core::mock::MockLlm;
    use delver_core::{LlmConfig, LlmError};

    fn analyzer(mock: &MockLlm) -> ResearchAnalyzer {
        let llm = LlmClient::new(Arc::new(mock.clone()), LlmConfig::default().with_max_retries(0));
        ResearchAnalyzer::new(llm, CallLimiter::new(1), Arc::new(ResearchPrompts::default()))
    }

    fn context() -> FittedContext {
        ContextBudget::chars(1000).fit_learnings(&[
            Learning::new("Wasm GC shipped in Chrome 119"),
            Learning::new("Firefox followed in version 120"),
        ])
    }

    #[tokio::test]
    async fn test_parses_and_cleans_sections() {
        let mock = MockLlm::text(
            json!({
                "findings": ["Major browsers support Wasm GC", "  ", "Major browsers support Wasm GC"],
                "gaps": ["Safari status unclear"],
                "recommendations": [" Track WebKit releases "]
            })
            .to_string(),
        );

        let analysis = analyzer(&mock)
            .analyze("wasm gc", &context(), "(none)", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(analysis.findings, vec!["Major browsers support Wasm GC"]);
        assert_eq!(analysis.gaps, vec!["Safari status unclear"]);
        assert_eq!(analysis.recommendations, vec!["Track WebKit releases"]);

        let call = &mock.calls()[0];
        assert_eq!(call.label, "analysis");
        assert!(call.prompt.contains("- Firefox followed in version 120"));
    }

    #[tokio::test]
    async fn test_missing_sections_default_empty() {
        let mock = MockLlm::text(r#"{"findings": ["one"]}"#);
        let analysis = analyzer(&mock)
            .analyze("t", &context(), "(none)", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(analysis.findings, vec!["one"]);
        assert!(analysis.gaps.is_empty());
        assert!(!analysis.is_empty());
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let mock = MockLlm::new(|_| Err(LlmError::InvalidRequest("bad".into())));
        let result = analyzer(&mock)
            .analyze("t", &context(), "(none)", &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let mock = MockLlm::text("{}");
        let token = CancellationToken::new();
        token.cancel();

        let result = analyzer(&mock).analyze("t", &context(), "(none)", &token).await;

        assert!(matches!(result, Err(ResearchError::Cancelled)));
        assert_eq!(mock.call_count(), 0);
    }
}
