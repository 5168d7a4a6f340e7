//! Final settings for one invocation.
//!
//! Layering, lowest first: built-in defaults, config files, environment
//! variables, command-line flags. Environment values arrive through the
//! flags' `env` fallbacks, so a flag given explicitly still wins over them.

use super::types::DelverConfig;
use crate::cli::Args;
use delver_core::{LlmConfig, SearchSource};
use delver_deep_research::{
    ResearchConfig, ResearchRequest, DEFAULT_BREADTH, DEFAULT_DEPTH,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Everything needed to build the clients and run one request
#[derive(Clone)]
pub struct Settings {
    pub llm: LlmConfig,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub tavily_api_key: Option<String>,
    pub serper_api_key: Option<String>,
    pub research: ResearchConfig,
    pub request: ResearchRequest,
    /// Markdown copy of the answer goes here when set
    pub output: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(file: DelverConfig, args: &Args) -> Self {
        let llm_file = file.llm.unwrap_or_default();
        let search_file = file.search.unwrap_or_default();
        let research_file = file.research.unwrap_or_default();

        let mut llm = llm_file.to_llm_config();
        if let Some(model) = &args.model {
            llm = llm.with_model(model.clone());
        }

        let tavily_api_key = args
            .tavily_api_key
            .clone()
            .or_else(|| search_file.tavily_api_key.clone());
        let serper_api_key = args
            .serper_api_key
            .clone()
            .or_else(|| search_file.serper_api_key.clone());

        let mut research = research_file.to_research_config(search_file.to_search_config());
        if let Some(v) = args.concurrency {
            research = research.with_concurrency(v);
        }
        if let Some(v) = args.context_size {
            research = research.with_context_size(v);
        }
        if args.fetch_content {
            let min_chars = research.fetch_min_chars;
            research = research.with_fetch_content(min_chars);
        }

        let source = args.source.or(search_file.source).unwrap_or_else(|| {
            default_source(tavily_api_key.is_some(), serper_api_key.is_some())
        });

        let mut request = ResearchRequest::new(args.query.trim())
            .with_breadth(args.breadth.or(research_file.breadth).unwrap_or(DEFAULT_BREADTH))
            .with_depth(args.depth.or(research_file.depth).unwrap_or(DEFAULT_DEPTH))
            .with_mode(args.mode.or(research_file.mode).unwrap_or_default())
            .with_source(source);
        if args.skip_clarification {
            request = request.skip_clarification();
        } else if !args.answers.is_empty() {
            let answers: BTreeMap<String, String> = args.answers.iter().cloned().collect();
            request = request.with_answers(answers);
        }

        Self {
            llm,
            openai_api_key: args.openai_api_key.clone().or(llm_file.api_key),
            openai_base_url: args.openai_base_url.clone().or(llm_file.base_url),
            tavily_api_key,
            serper_api_key,
            research,
            request,
            output: args.output.clone(),
        }
    }

    /// API key for the selected search source, if one is configured.
    pub fn search_api_key(&self) -> Option<&str> {
        match self.request.source {
            SearchSource::Tavily => self.tavily_api_key.as_deref(),
            SearchSource::Serper => self.serper_api_key.as_deref(),
        }
    }
}

/// Serper unless only a Tavily key is available.
fn default_source(has_tavily: bool, has_serper: bool) -> SearchSource {
    if has_tavily && !has_serper {
        SearchSource::Tavily
    } else {
        SearchSource::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use delver_deep_research::{Clarifications, OutputMode};

    fn args(extra: &[&str]) -> Args {
        // Keys passed explicitly so ambient environment variables never matter.
        let base = [
            "delver",
            "topic",
            "--openai-api-key",
            "sk-flag",
            "--tavily-api-key",
            "tv-flag",
            "--serper-api-key",
            "sp-flag",
        ];
        Args::try_parse_from(base.iter().chain(extra.iter()).copied()).unwrap()
    }

    fn file(toml_text: &str) -> DelverConfig {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::resolve(DelverConfig::default(), &args(&[]));

        assert_eq!(settings.request.breadth, DEFAULT_BREADTH);
        assert_eq!(settings.request.depth, DEFAULT_DEPTH);
        assert_eq!(settings.request.mode, OutputMode::Report);
        assert_eq!(settings.request.clarifications, Clarifications::Ask);
        assert_eq!(settings.request.source, SearchSource::Serper);
        assert_eq!(settings.search_api_key(), Some("sp-flag"));
        assert!(settings.output.is_none());
        assert!(settings.research.analyze);
    }

    #[test]
    fn test_output_path_and_analysis_toggle() {
        let config = file(
            r#"
            [research]
            analyze = false
            "#,
        );
        let settings = Settings::resolve(config, &args(&["--output", "report.md"]));

        assert_eq!(settings.output, Some(PathBuf::from("report.md")));
        assert!(!settings.research.analyze);
    }

    #[test]
    fn test_flags_override_file() {
        let config = file(
            r#"
            [llm]
            model = "from-file"
            api_key = "sk-file"

            [search]
            source = "tavily"

            [research]
            breadth = 2
            depth = 3
            concurrency = 9
            "#,
        );
        let settings = Settings::resolve(config, &args(&["--breadth", "5", "--model", "m"]));

        assert_eq!(settings.request.breadth, 5);
        assert_eq!(settings.request.depth, 3);
        assert_eq!(settings.request.source, SearchSource::Tavily);
        assert_eq!(settings.research.concurrency, 9);
        assert_eq!(settings.llm.model, "m");
        assert_eq!(settings.openai_api_key.as_deref(), Some("sk-flag"));
    }

    #[test]
    fn test_answers_become_request_answers() {
        let settings = Settings::resolve(
            DelverConfig::default(),
            &args(&["--answer", "region=EU", "--fetch-content"]),
        );

        match &settings.request.clarifications {
            Clarifications::Answers(answers) => assert_eq!(answers["region"], "EU"),
            other => panic!("expected answers, got {:?}", other),
        }
        assert!(settings.research.fetch_content);
    }

    #[test]
    fn test_skip_clarification() {
        let settings = Settings::resolve(DelverConfig::default(), &args(&["--skip-clarification"]));
        assert_eq!(settings.request.clarifications, Clarifications::SkipAll);
    }

    #[test]
    fn test_default_source_follows_available_key() {
        assert_eq!(default_source(true, false), SearchSource::Tavily);
        assert_eq!(default_source(true, true), SearchSource::Serper);
        assert_eq!(default_source(false, false), SearchSource::Serper);
    }
}
