//! Command-line argument parsing.

use clap::Parser;
use delver_core::SearchSource;
use delver_deep_research::OutputMode;
use std::path::PathBuf;

/// Recursive web research from the terminal
#[derive(Parser, Debug)]
#[command(name = "delver")]
#[command(about = "Deep research agent: plans searches, follows leads, writes a cited report", long_about = None)]
#[command(version)]
pub struct Args {
    /// Research topic or question
    pub query: String,

    /// Queries planned at the root (children get half, minimum 1)
    #[arg(short, long)]
    pub breadth: Option<usize>,

    /// Research levels, counting the root (0 and 1 both mean root queries only)
    #[arg(short, long)]
    pub depth: Option<usize>,

    /// Output shape: concise or report
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<OutputMode>,

    /// Search provider: tavily or serper
    #[arg(long, value_parser = parse_source)]
    pub source: Option<SearchSource>,

    /// Maximum concurrent model, search and fetch calls
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Context budget for learnings in prompts (characters)
    #[arg(long)]
    pub context_size: Option<usize>,

    /// Research the topic as given, without clarifying questions
    #[arg(long)]
    pub skip_clarification: bool,

    /// Answer a clarifying question up front (repeatable)
    #[arg(long = "answer", value_name = "KEY=VALUE", value_parser = parse_answer)]
    pub answers: Vec<(String, String)>,

    /// Also write the answer as Markdown to this file
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Extra config file, applied over ~/.delver/config.toml and ./delver.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Model identifier
    #[arg(long)]
    pub model: Option<String>,

    /// Fetch full page text for results with short snippets
    #[arg(long)]
    pub fetch_content: bool,

    /// OpenAI-compatible API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    pub tavily_api_key: Option<String>,

    #[arg(long, env = "SERPER_API_KEY", hide_env_values = true)]
    pub serper_api_key: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();
        if self.query.trim().is_empty() {
            errors.push("query cannot be empty".to_string());
        }
        if self.breadth == Some(0) {
            errors.push("--breadth must be at least 1".to_string());
        }
        if self.concurrency == Some(0) {
            errors.push("--concurrency must be at least 1".to_string());
        }
        if self.context_size == Some(0) {
            errors.push("--context-size must be greater than 0".to_string());
        }
        if self.output.as_deref().is_some_and(|p| p.as_os_str().is_empty()) {
            errors.push("--output cannot be empty".to_string());
        }
        if self.skip_clarification && !self.answers.is_empty() {
            errors.push("--skip-clarification cannot be combined with --answer".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

fn parse_mode(s: &str) -> Result<OutputMode, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn parse_source(s: &str) -> Result<SearchSource, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn parse_answer(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{}'", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("delver").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_are_unset() {
        let args = parse(&["what is rust"]);
        assert_eq!(args.query, "what is rust");
        assert!(args.breadth.is_none());
        assert!(args.mode.is_none());
        assert!(!args.skip_clarification);
        assert!(args.output.is_none());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_full_flag_set() {
        let args = parse(&[
            "topic",
            "--breadth",
            "3",
            "--depth",
            "1",
            "--mode",
            "concise",
            "--source",
            "Tavily",
            "--answer",
            "region=EU",
            "--answer",
            "period = 2020s",
            "--fetch-content",
            "-o",
            "out/report.md",
        ]);

        assert_eq!(args.breadth, Some(3));
        assert_eq!(args.depth, Some(1));
        assert_eq!(args.mode, Some(OutputMode::Concise));
        assert_eq!(args.source, Some(SearchSource::Tavily));
        assert_eq!(
            args.answers,
            vec![
                ("region".to_string(), "EU".to_string()),
                ("period".to_string(), "2020s".to_string())
            ]
        );
        assert!(args.fetch_content);
        assert_eq!(args.output, Some(PathBuf::from("out/report.md")));
    }

    #[test]
    fn test_output_long_flag() {
        let args = parse(&["topic", "--output", "answer.md"]);
        assert_eq!(args.output.as_deref(), Some(std::path::Path::new("answer.md")));
        assert!(args.validate().is_ok());
    }

    #[rstest]
    #[case("no-equals")]
    #[case("=value")]
    fn test_bad_answer_rejected(#[case] answer: &str) {
        assert!(parse_answer(answer).is_err());
    }

    #[test]
    fn test_unknown_source_rejected() {
        let result = Args::try_parse_from(["delver", "topic", "--source", "bing"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let args = parse(&[
            " ",
            "--breadth",
            "0",
            "--skip-clarification",
            "--answer",
            "a=b",
        ]);
        let err = args.validate().unwrap_err();
        assert!(err.contains("query"));
        assert!(err.contains("--breadth"));
        assert!(err.contains("--skip-clarification"));
    }
}
