//! Text formatting for the final output.

use delver_deep_research::{OutputMode, ResearchOutcome};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

pub use delver_core::truncate;

/// Format a duration as a human-readable string.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 10.0 {
        format!("{:.2}s", secs)
    } else if secs < 120.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{}m {:02}s", duration.as_secs() / 60, duration.as_secs() % 60)
    }
}

/// Summary lines printed under the answer.
pub fn summary_lines(outcome: &ResearchOutcome, elapsed: Duration) -> Vec<String> {
    let stats = &outcome.stats;
    let mut lines = vec![
        format!("   Total time: {}", format_duration(elapsed)),
        format!(
            "   Tree: {} levels, {} nodes ({} failed), {} queries ({} failed)",
            stats.levels_completed,
            stats.nodes_run,
            stats.nodes_failed,
            stats.queries_issued,
            stats.searches_failed
        ),
        format!(
            "   Learnings: {}   Sources: {}",
            outcome.learnings.len(),
            outcome.sources.len()
        ),
    ];
    if stats.cancelled {
        lines.push("   Interrupted: answer written from partial research".to_string());
    }
    lines
}

/// Print the final answer or report with its assumptions, sources and stats.
pub fn print_final_result(outcome: &ResearchOutcome, elapsed: Duration) {
    let title = match outcome.mode {
        OutputMode::Concise => "ANSWER",
        OutputMode::Report => "RESEARCH REPORT",
    };
    let rule = "═".repeat(64);

    println!();
    println!("{}", rule);
    println!("  {}: {}", title, truncate(&outcome.topic, 50));
    println!("{}", rule);
    println!();
    println!("{}", outcome.answer.trim());
    println!();

    if !outcome.assumptions.is_empty() {
        println!("Assumptions:");
        for assumption in &outcome.assumptions {
            println!("   - {}", assumption);
        }
        println!();
    }

    for (heading, items) in [
        ("Open questions:", &outcome.gaps),
        ("Next steps:", &outcome.recommendations),
    ] {
        if !items.is_empty() {
            println!("{}", heading);
            for item in items {
                println!("   - {}", item);
            }
            println!();
        }
    }

    if !outcome.sources.is_empty() {
        println!("Sources:");
        for (i, source) in outcome.sources.iter().enumerate() {
            println!("   [{}] {}", i + 1, source);
        }
        println!();
    }

    println!("{}", rule);
    for line in summary_lines(outcome, elapsed) {
        println!("{}", line);
    }
}

fn markdown_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n## {}\n", heading);
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
}

/// The answer as a Markdown document, with assumptions, open questions,
/// next steps and numbered sources.
pub fn render_markdown(outcome: &ResearchOutcome) -> String {
    let mut out = format!("# {}\n\n{}\n", outcome.topic, outcome.answer.trim());
    markdown_list(&mut out, "Assumptions", &outcome.assumptions);
    markdown_list(&mut out, "Open questions", &outcome.gaps);
    markdown_list(&mut out, "Next steps", &outcome.recommendations);

    if !outcome.sources.is_empty() {
        out.push_str("\n## Sources\n\n");
        for (i, source) in outcome.sources.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, source);
        }
    }
    out
}

/// Write [`render_markdown`] to `path`, creating parent directories.
pub fn write_report(path: &Path, outcome: &ResearchOutcome) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_markdown(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use delver_deep_research::RunStats;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::from_millis(250), "250ms")]
    #[case(Duration::from_millis(1500), "1.50s")]
    #[case(Duration::from_secs(42), "42.0s")]
    #[case(Duration::from_secs(185), "3m 05s")]
    fn test_format_duration(#[case] duration: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(duration), expected);
    }

    fn outcome() -> ResearchOutcome {
        ResearchOutcome {
            topic: "t".into(),
            original_topic: "t".into(),
            answer: "a".into(),
            mode: OutputMode::Report,
            assumptions: vec![],
            learnings: vec![],
            sources: vec!["https://a.example".into()],
            gaps: vec![],
            recommendations: vec![],
            stats: RunStats {
                levels_completed: 2,
                nodes_run: 5,
                cancelled: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_summary_marks_partial_runs() {
        let outcome = outcome();

        let lines = summary_lines(&outcome, Duration::from_secs(3));
        assert!(lines[1].contains("2 levels, 5 nodes"));
        assert!(lines[2].contains("Sources: 1"));
        assert!(lines.last().unwrap().contains("partial"));
    }

    #[test]
    fn test_markdown_skips_empty_sections() {
        let text = render_markdown(&outcome());
        assert!(text.starts_with("# t\n\na\n"));
        assert!(text.contains("## Sources\n\n1. https://a.example\n"));
        assert!(!text.contains("## Open questions"));
        assert!(!text.contains("## Assumptions"));
    }

    #[test]
    fn test_write_report_creates_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("report.md");
        let outcome = ResearchOutcome {
            answer: "  The answer.  ".into(),
            gaps: vec!["Unclear long-term cost".into()],
            recommendations: vec!["Benchmark it".into()],
            ..outcome()
        };

        write_report(&path, &outcome).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("The answer.\n"));
        assert!(written.contains("## Open questions\n\n- Unclear long-term cost\n"));
        assert!(written.contains("## Next steps\n\n- Benchmark it\n"));
        assert_eq!(written, render_markdown(&outcome));
    }
}
