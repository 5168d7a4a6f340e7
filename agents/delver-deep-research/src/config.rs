//! Configuration for the research agent.

use crate::error::ResearchError;
use delver_core::SearchConfig;
use std::collections::HashSet;

/// Placeholder constants for template validation
mod placeholders {
    pub const PLANNING: &[&str] = &["{topic}", "{count}"];
    pub const EXTRACTION: &[&str] = &["{query}", "{results}"];
    pub const CLARIFY: &[&str] = &["{topic}", "{max}"];
    pub const REFINE: &[&str] = &["{topic}", "{answers}"];
    pub const SYNTHESIS: &[&str] = &["{topic}", "{learnings}"];
    pub const ANALYSIS: &[&str] = &["{topic}", "{learnings}"];
}

/// Substitute `{name}` placeholders in a single left-to-right pass.
///
/// Substituted values are never rescanned, so search results or user text
/// containing a literal `{topic}` are left alone. Unknown placeholders are
/// kept verbatim.
pub(crate) fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('}') else {
            out.push_str(after);
            return out;
        };
        let placeholder = &after[..=close];
        match vars.iter().find(|(name, _)| {
            placeholder.len() == name.len() + 2 && &placeholder[1..placeholder.len() - 1] == *name
        }) {
            Some((_, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render items as "- item" lines, or "(none)" when there are none.
pub(crate) fn bullets<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompts used by the research pipeline
///
/// # Template Placeholders
///
/// - `planning_template`: `{topic}`, `{count}` required; `{seed}`, `{follow_ups}`,
///   `{learnings}`, `{exclude}`, `{history}` optional
/// - `extraction_template`: `{query}`, `{results}` required; `{max_learnings}`,
///   `{max_follow_ups}`, `{history}` optional
/// - `clarify_template`: `{topic}`, `{max}` required; `{history}` optional
/// - `refine_template`: `{topic}`, `{answers}` required; `{unanswered}`, `{history}` optional
/// - `report_template` / `answer_template`: `{topic}`, `{learnings}` required;
///   `{sources}`, `{gaps}`, `{history}` optional
/// - `analysis_template`: `{topic}`, `{learnings}` required; `{history}` optional
///
/// # Example
///
/// ```
/// use delver_deep_research::ResearchPrompts;
///
/// let mut prompts = ResearchPrompts::default();
/// prompts.planning_system = "You are a biomedical search strategist.".to_string();
/// assert!(prompts.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ResearchPrompts {
    pub planning_system: String,
    pub planning_template: String,
    pub extraction_system: String,
    pub extraction_template: String,
    pub clarify_system: String,
    pub clarify_template: String,
    pub refine_template: String,
    pub synthesis_system: String,
    pub report_template: String,
    pub answer_template: String,
    pub analysis_system: String,
    pub analysis_template: String,
}

impl Default for ResearchPrompts {
    fn default() -> Self {
        Self {
            planning_system:
                "You are an expert researcher who writes precise, effective web search queries. Respond only with JSON."
                    .to_string(),
            planning_template: r#"Research topic: {topic}

Current line of inquiry: {seed}

Open questions from earlier findings:
{follow_ups}

What we have learned so far:
{learnings}

Conversation context:
{history}

Generate at most {count} web search queries that each advance this research in a distinct direction.
Do not repeat or trivially rephrase any of these already-issued queries:
{exclude}

Return JSON: {"queries": [{"query": "...", "rationale": "why this query advances the research"}]}"#
                .to_string(),
            extraction_system:
                "You extract precise, self-contained facts from web search results. Respond only with JSON."
                    .to_string(),
            extraction_template: r#"Search query: {query}

Conversation context:
{history}

Search results:
{results}

Extract up to {max_learnings} atomic learnings that help answer the query. Each learning must be a
single self-contained factual statement, keep concrete numbers, names and dates, and cite the URLs
of the results it came from. Then suggest up to {max_follow_ups} follow-up questions worth
researching next.

Return JSON: {"learnings": [{"text": "...", "sources": ["https://..."]}], "follow_up_questions": ["..."]}"#
                .to_string(),
            clarify_system:
                "You are a research assistant deciding whether a request is ambiguous. Respond only with JSON."
                    .to_string(),
            clarify_template: r#"Research request: {topic}

Conversation context:
{history}

If the request is ambiguous, too broad, or missing key context, ask at most {max} clarifying
questions, each with a reasonable default answer. Simple or clear requests need no questions.

Return JSON: {"needs_clarification": true, "questions": [{"key": "short_key", "question": "...", "default": "..."}]}"#
                .to_string(),
            refine_template: r#"Original request: {topic}

Clarifications provided by the user:
{answers}

Questions left unanswered (defaults apply):
{unanswered}

Conversation context:
{history}

Rewrite the request as a single refined research topic that includes the clarifications, list
the assumptions made for unanswered questions, and decide whether web search is needed. If it
is not, answer directly.

Return JSON: {"refined_query": "...", "assumptions": ["..."], "requires_search": true, "direct_answer": ""}"#
                .to_string(),
            synthesis_system: "You are an expert research analyst. Be accurate, organized and thorough. Never invent facts that are not supported by the provided learnings."
                .to_string(),
            report_template: r#"Write a comprehensive, well-structured markdown research report on:
{topic}

Use headings, subheadings and a conclusion. Cite sources inline as [cite](url) using only the URLs
below.

Conversation context:
{history}

Learnings:
{learnings}

Open questions the research could not settle (mention them where relevant):
{gaps}

Sources:
{sources}"#
                .to_string(),
            answer_template: r#"Give a concise, direct answer to:
{topic}

Keep it to a few sentences or a short list, and cite sources as [cite](url) using only the URLs below.

Conversation context:
{history}

Learnings:
{learnings}

Sources:
{sources}"#
                .to_string(),
            analysis_system:
                "You are a research analyst reviewing accumulated findings. Respond only with JSON."
                    .to_string(),
            analysis_template: r#"Research topic: {topic}

Conversation context:
{history}

Everything learned so far:
{learnings}

Analyze these learnings as a whole. List the key findings (each a self-contained statement that
combines or concludes from the learnings), the gaps the research left open, and recommendations
for further research or action.

Return JSON: {"findings": ["..."], "gaps": ["..."], "recommendations": ["..."]}"#
                .to_string(),
        }
    }
}

impl ResearchPrompts {
    /// Validate that all prompts are non-empty and templates contain required placeholders
    pub fn validate(&self) -> Result<(), ResearchError> {
        let mut errors = Vec::new();

        let systems = [
            ("planning_system", &self.planning_system),
            ("extraction_system", &self.extraction_system),
            ("clarify_system", &self.clarify_system),
            ("synthesis_system", &self.synthesis_system),
            ("analysis_system", &self.analysis_system),
        ];
        for (name, value) in systems {
            if value.trim().is_empty() {
                errors.push(format!("{} cannot be empty", name));
            }
        }

        let templates = [
            ("planning_template", &self.planning_template, placeholders::PLANNING),
            ("extraction_template", &self.extraction_template, placeholders::EXTRACTION),
            ("clarify_template", &self.clarify_template, placeholders::CLARIFY),
            ("refine_template", &self.refine_template, placeholders::REFINE),
            ("report_template", &self.report_template, placeholders::SYNTHESIS),
            ("answer_template", &self.answer_template, placeholders::SYNTHESIS),
            ("analysis_template", &self.analysis_template, placeholders::ANALYSIS),
        ];
        for (name, template, required) in templates {
            if template.trim().is_empty() {
                errors.push(format!("{} cannot be empty", name));
                continue;
            }
            let missing = validate_template_placeholders(template, required);
            if !missing.is_empty() {
                errors.push(format!(
                    "{} missing required placeholders: {}",
                    name,
                    missing.join(", ")
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ResearchError::InvalidConfig(errors.join("; ")))
        }
    }
}

/// Configuration for the research agent
///
/// Breadth, depth and output mode are per-request and live on
/// [`ResearchRequest`](crate::ResearchRequest).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ResearchConfig {
    /// Maximum simultaneous external calls (planning, search, fetch,
    /// extraction, clarification, synthesis) across the whole run
    ///
    /// Default: 3
    pub concurrency: usize,

    /// Child breadth is `max(1, parent_breadth / breadth_divisor)`
    ///
    /// Default: 2
    pub breadth_divisor: usize,

    /// Maximum size of serialized learnings passed to planning and synthesis,
    /// measured by the configured length estimator
    ///
    /// Default: 128,000
    pub context_size: usize,

    /// Size budget for search result bodies in one extraction call
    ///
    /// Split evenly across the results of the query; each body is truncated
    /// rather than dropped.
    /// Default: 24,000
    pub extraction_content_budget: usize,

    /// Maximum learnings kept per extraction call
    ///
    /// Default: 5
    pub max_learnings_per_query: usize,

    /// Maximum follow-up questions kept per extraction call
    ///
    /// Default: 3
    pub max_follow_ups: usize,

    /// Maximum clarifying questions asked before research starts
    ///
    /// Default: 3
    pub max_clarifying_questions: usize,

    /// Fetch full page text for results with short snippets
    ///
    /// Default: false
    pub fetch_content: bool,

    /// Snippets shorter than this (in chars) are enriched when `fetch_content` is set
    ///
    /// Default: 300
    pub fetch_min_chars: usize,

    /// Run a final analysis call (findings, gaps, recommendations) before
    /// synthesis; its findings join the learnings
    ///
    /// Default: true
    pub analyze: bool,

    /// Search provider call settings
    pub search: SearchConfig,

    /// Prompts for every pipeline step
    pub prompts: ResearchPrompts,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            breadth_divisor: 2,
            context_size: 128_000,
            extraction_content_budget: 24_000,
            max_learnings_per_query: 5,
            max_follow_ups: 3,
            max_clarifying_questions: 3,
            fetch_content: false,
            fetch_min_chars: 300,
            analyze: true,
            search: SearchConfig::default(),
            prompts: ResearchPrompts::default(),
        }
    }
}

impl ResearchConfig {
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_breadth_divisor(mut self, divisor: usize) -> Self {
        self.breadth_divisor = divisor;
        self
    }

    #[must_use]
    pub fn with_context_size(mut self, context_size: usize) -> Self {
        self.context_size = context_size;
        self
    }

    #[must_use]
    pub fn with_extraction_content_budget(mut self, budget: usize) -> Self {
        self.extraction_content_budget = budget;
        self
    }

    #[must_use]
    pub fn with_max_learnings_per_query(mut self, max: usize) -> Self {
        self.max_learnings_per_query = max;
        self
    }

    #[must_use]
    pub fn with_max_follow_ups(mut self, max: usize) -> Self {
        self.max_follow_ups = max;
        self
    }

    #[must_use]
    pub fn with_max_clarifying_questions(mut self, max: usize) -> Self {
        self.max_clarifying_questions = max;
        self
    }

    /// Enable page fetching for results whose snippet is shorter than `min_chars`.
    #[must_use]
    pub fn with_fetch_content(mut self, min_chars: usize) -> Self {
        self.fetch_content = true;
        self.fetch_min_chars = min_chars;
        self
    }

    #[must_use]
    pub fn with_analysis(mut self, analyze: bool) -> Self {
        self.analyze = analyze;
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    #[must_use]
    pub fn with_prompts(mut self, prompts: ResearchPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// Breadth allotted to the children of a node with `parent` breadth.
    pub fn child_breadth(&self, parent: usize) -> usize {
        (parent / self.breadth_divisor.max(1)).max(1)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ResearchError> {
        let mut errors = Vec::new();

        if self.concurrency == 0 {
            errors.push("concurrency must be greater than 0".to_string());
        }
        if self.breadth_divisor == 0 {
            errors.push("breadth_divisor must be greater than 0".to_string());
        }
        if self.context_size == 0 {
            errors.push("context_size must be greater than 0".to_string());
        }
        if self.extraction_content_budget == 0 {
            errors.push("extraction_content_budget must be greater than 0".to_string());
        }
        if self.max_learnings_per_query == 0 {
            errors.push("max_learnings_per_query must be greater than 0".to_string());
        }
        if self.search.max_results_per_query == 0 {
            errors.push("search.max_results_per_query must be greater than 0".to_string());
        }
        if self.search.timeout.is_zero() {
            errors.push("search.timeout must be greater than 0".to_string());
        }

        if let Err(ResearchError::InvalidConfig(prompt_errors)) = self.prompts.validate() {
            errors.push(prompt_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ResearchError::InvalidConfig(errors.join("; ")))
        }
    }
}

// ============================================================================
// Helper functions for template validation
// ============================================================================

/// Extracts all placeholders from a template string
fn extract_placeholders(template: &str) -> Vec<String> {
    let mut placeholders = Vec::new();
    let mut seen = HashSet::new();
    let mut chars = template.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        if ch == '{' {
            let mut current_start = start;
            let mut end = None;

            for (i, c) in chars.by_ref() {
                if c == '{' {
                    current_start = i;
                } else if c == '}' {
                    end = Some(i);
                    break;
                }
            }

            if let Some(end_idx) = end {
                let placeholder = &template[current_start..=end_idx];
                if seen.insert(placeholder.to_string()) {
                    placeholders.push(placeholder.to_string());
                }
            }
        }
    }

    placeholders
}

/// Validates that a template contains required placeholders
fn validate_template_placeholders(template: &str, required: &[&str]) -> Vec<String> {
    let found = extract_placeholders(template);
    required
        .iter()
        .filter(|p| !found.iter().any(|f| f == *p))
        .map(|p| (*p).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config_is_valid() {
        let config = ResearchConfig::default();
        assert_eq!(config.concurrency, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_prompts() {
        assert!(ResearchPrompts::default().validate().is_ok());
    }

    #[rstest]
    #[case(4, 2)]
    #[case(3, 1)]
    #[case(1, 1)]
    #[case(0, 1)]
    fn test_child_breadth(#[case] parent: usize, #[case] expected: usize) {
        assert_eq!(ResearchConfig::default().child_breadth(parent), expected);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let config = ResearchConfig::default()
            .with_concurrency(0)
            .with_context_size(0);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("concurrency"));
        assert!(err.contains("context_size"));
        assert!(err.contains("; "));
    }

    #[test]
    fn test_validation_missing_placeholder() {
        let mut prompts = ResearchPrompts::default();
        prompts.report_template = "Write about {topic}".to_string();

        let err = prompts.validate().unwrap_err().to_string();
        assert!(err.contains("report_template"));
        assert!(err.contains("{learnings}"));
    }

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let rendered = render("Q: {query} ({count})", &[("query", "rust"), ("count", "3")]);
        assert_eq!(rendered, "Q: rust (3)");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let rendered = render(
            "{results} / {topic}",
            &[("results", "literal {topic} here"), ("topic", "T")],
        );
        assert_eq!(rendered, "literal {topic} here / T");
    }

    #[test]
    fn test_render_keeps_unknown_and_json_braces() {
        let rendered = render(r#"{"queries": []} {x}"#, &[("topic", "T")]);
        assert_eq!(rendered, r#"{"queries": []} {x}"#);
    }

    #[test]
    fn test_bullets() {
        assert_eq!(bullets::<String>(&[]), "(none)");
        assert_eq!(bullets(&["a", "b"]), "- a\n- b");
    }

    #[test]
    fn test_extract_placeholders_nested() {
        let found = extract_placeholders("{outer {inner}}");
        assert_eq!(found, vec!["{inner}".to_string()]);
    }
}
