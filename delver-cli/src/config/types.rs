//! TOML-serializable configuration types.
//!
//! Every field is optional so that files can be layered: a value set in a
//! later file replaces the earlier one, unset values fall through.

use delver_core::{LlmConfig, SearchConfig, SearchSource};
use delver_deep_research::{OutputMode, ResearchConfig, ResearchPrompts};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root of a `delver.toml` file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DelverConfig {
    pub llm: Option<LlmToml>,
    pub search: Option<SearchToml>,
    pub research: Option<ResearchToml>,
}

fn merge_section<T>(slot: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
    if let Some(other) = other {
        match slot {
            Some(existing) => merge(existing, other),
            None => *slot = Some(other),
        }
    }
}

/// Overwrite `$self.$field` for every `$field` that `$other` sets.
macro_rules! merge_fields {
    ($self:ident, $other:ident, [$($field:ident),* $(,)?]) => {
        $(
            if $other.$field.is_some() {
                $self.$field = $other.$field;
            }
        )*
    };
}

impl DelverConfig {
    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: DelverConfig) {
        merge_section(&mut self.llm, other.llm, LlmToml::merge);
        merge_section(&mut self.search, other.search, SearchToml::merge);
        merge_section(&mut self.research, other.research, ResearchToml::merge);
    }

    pub fn is_empty(&self) -> bool {
        self.llm.is_none() && self.search.is_none() && self.research.is_none()
    }
}

/// `[llm]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LlmToml {
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// OpenAI-compatible endpoint, e.g. a local inference server
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub max_retries: Option<u32>,
}

impl LlmToml {
    pub fn merge(&mut self, other: LlmToml) {
        merge_fields!(
            self,
            other,
            [model, api_key, base_url, timeout_secs, max_tokens, temperature, max_retries]
        );
    }

    pub fn to_llm_config(&self) -> LlmConfig {
        let mut config = LlmConfig::default();
        if let Some(v) = &self.model {
            config = config.with_model(v.clone());
        }
        if let Some(v) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(v));
        }
        if let Some(v) = self.max_tokens {
            config = config.with_max_tokens(v);
        }
        if let Some(v) = self.temperature {
            config = config.with_temperature(v);
        }
        if let Some(v) = self.max_retries {
            config = config.with_max_retries(v);
        }
        config
    }
}

/// `[search]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SearchToml {
    pub source: Option<SearchSource>,
    pub tavily_api_key: Option<String>,
    pub serper_api_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_results_per_query: Option<usize>,
    pub max_retries: Option<u32>,
}

impl SearchToml {
    pub fn merge(&mut self, other: SearchToml) {
        merge_fields!(
            self,
            other,
            [
                source,
                tavily_api_key,
                serper_api_key,
                timeout_secs,
                max_results_per_query,
                max_retries
            ]
        );
    }

    pub fn to_search_config(&self) -> SearchConfig {
        let mut config = SearchConfig::default();
        if let Some(v) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(v));
        }
        if let Some(v) = self.max_results_per_query {
            config = config.with_max_results_per_query(v);
        }
        if let Some(v) = self.max_retries {
            config = config.with_max_retries(v);
        }
        config
    }
}

/// `[research]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ResearchToml {
    pub breadth: Option<usize>,
    pub depth: Option<usize>,
    pub mode: Option<OutputMode>,
    pub concurrency: Option<usize>,
    pub context_size: Option<usize>,
    pub breadth_divisor: Option<usize>,
    pub extraction_content_budget: Option<usize>,
    pub max_learnings_per_query: Option<usize>,
    pub max_follow_ups: Option<usize>,
    pub max_clarifying_questions: Option<usize>,
    pub fetch_content: Option<bool>,
    pub fetch_min_chars: Option<usize>,
    /// Run the final analysis before synthesis
    pub analyze: Option<bool>,
    pub prompts: Option<PromptsToml>,
}

impl ResearchToml {
    pub fn merge(&mut self, other: ResearchToml) {
        merge_fields!(
            self,
            other,
            [
                breadth,
                depth,
                mode,
                concurrency,
                context_size,
                breadth_divisor,
                extraction_content_budget,
                max_learnings_per_query,
                max_follow_ups,
                max_clarifying_questions,
                fetch_content,
                fetch_min_chars,
                analyze
            ]
        );
        merge_section(&mut self.prompts, other.prompts, PromptsToml::merge);
    }

    /// Agent configuration with file overrides applied to the defaults.
    ///
    /// Request-level values (breadth, depth, mode) are not part of it.
    pub fn to_research_config(&self, search: SearchConfig) -> ResearchConfig {
        let mut config = ResearchConfig::default().with_search(search);

        if let Some(v) = self.concurrency {
            config = config.with_concurrency(v);
        }
        if let Some(v) = self.context_size {
            config = config.with_context_size(v);
        }
        if let Some(v) = self.breadth_divisor {
            config = config.with_breadth_divisor(v);
        }
        if let Some(v) = self.extraction_content_budget {
            config = config.with_extraction_content_budget(v);
        }
        if let Some(v) = self.max_learnings_per_query {
            config = config.with_max_learnings_per_query(v);
        }
        if let Some(v) = self.max_follow_ups {
            config = config.with_max_follow_ups(v);
        }
        if let Some(v) = self.max_clarifying_questions {
            config = config.with_max_clarifying_questions(v);
        }
        if self.fetch_content == Some(true) {
            let min_chars = self.fetch_min_chars.unwrap_or(config.fetch_min_chars);
            config = config.with_fetch_content(min_chars);
        }
        if let Some(v) = self.analyze {
            config = config.with_analysis(v);
        }
        if let Some(prompts) = &self.prompts {
            config = config.with_prompts(prompts.to_research_prompts());
        }

        config
    }
}

/// `[research.prompts]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PromptsToml {
    pub planning_system: Option<String>,
    pub planning_template: Option<String>,
    pub extraction_system: Option<String>,
    pub extraction_template: Option<String>,
    pub clarify_system: Option<String>,
    pub clarify_template: Option<String>,
    pub refine_template: Option<String>,
    pub analysis_system: Option<String>,
    pub analysis_template: Option<String>,
    pub synthesis_system: Option<String>,
    pub report_template: Option<String>,
    pub answer_template: Option<String>,
}

impl PromptsToml {
    pub fn merge(&mut self, other: PromptsToml) {
        merge_fields!(
            self,
            other,
            [
                planning_system,
                planning_template,
                extraction_system,
                extraction_template,
                clarify_system,
                clarify_template,
                refine_template,
                analysis_system,
                analysis_template,
                synthesis_system,
                report_template,
                answer_template
            ]
        );
    }

    pub fn to_research_prompts(&self) -> ResearchPrompts {
        let mut prompts = ResearchPrompts::default();
        let overrides = [
            (&mut prompts.planning_system, &self.planning_system),
            (&mut prompts.planning_template, &self.planning_template),
            (&mut prompts.extraction_system, &self.extraction_system),
            (&mut prompts.extraction_template, &self.extraction_template),
            (&mut prompts.clarify_system, &self.clarify_system),
            (&mut prompts.clarify_template, &self.clarify_template),
            (&mut prompts.refine_template, &self.refine_template),
            (&mut prompts.analysis_system, &self.analysis_system),
            (&mut prompts.analysis_template, &self.analysis_template),
            (&mut prompts.synthesis_system, &self.synthesis_system),
            (&mut prompts.report_template, &self.report_template),
            (&mut prompts.answer_template, &self.answer_template),
        ];
        for (slot, value) in overrides {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        prompts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config: DelverConfig = toml::from_str(
            r#"
            [llm]
            model = "gpt-4o"
            timeout_secs = 90

            [search]
            source = "tavily"
            max_results_per_query = 3

            [research]
            breadth = 5
            mode = "concise"
            fetch_content = true
            analyze = false

            [research.prompts]
            synthesis_system = "Be brief."
            analysis_system = "Be critical."
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.as_ref().unwrap().model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.search.as_ref().unwrap().source, Some(SearchSource::Tavily));
        let research = config.research.unwrap();
        assert_eq!(research.breadth, Some(5));
        assert_eq!(research.mode, Some(OutputMode::Concise));

        let rc = research.to_research_config(SearchConfig::default());
        assert!(rc.fetch_content);
        assert!(!rc.analyze);
        assert_eq!(rc.prompts.synthesis_system, "Be brief.");
        assert_eq!(rc.prompts.analysis_system, "Be critical.");
        assert_eq!(
            rc.prompts.planning_template,
            ResearchPrompts::default().planning_template
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<DelverConfig, _> = toml::from_str("[research]\nbredth = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_is_field_by_field() {
        let mut base: DelverConfig = toml::from_str(
            "[research]\nbreadth = 2\ndepth = 1\n[llm]\nmodel = \"a\"\n",
        )
        .unwrap();
        let overlay: DelverConfig = toml::from_str("[research]\ndepth = 3\n").unwrap();

        base.merge(overlay);

        let research = base.research.unwrap();
        assert_eq!(research.breadth, Some(2));
        assert_eq!(research.depth, Some(3));
        assert_eq!(base.llm.unwrap().model.as_deref(), Some("a"));
    }

    #[test]
    fn test_empty_sections_keep_defaults() {
        let config = DelverConfig::default();
        assert!(config.is_empty());

        let llm = LlmToml::default().to_llm_config();
        assert_eq!(llm.model, LlmConfig::default().model);

        let search = SearchToml {
            max_results_per_query: Some(2),
            ..Default::default()
        }
        .to_search_config();
        assert_eq!(search.max_results_per_query, 2);
        assert_eq!(search.max_retries, SearchConfig::default().max_retries);
    }
}
