//! Interactive answers to clarifying questions.

use async_trait::async_trait;
use delver_deep_research::{ClarificationHandler, ClarifyingQuestion};
use std::collections::BTreeMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Asks each clarifying question on stderr and reads one answer line per
/// question. An empty line keeps the question's default; end of input keeps
/// the defaults for every remaining question.
pub struct PromptClarifier<R> {
    lines: Mutex<Lines<R>>,
}

impl PromptClarifier<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> PromptClarifier<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ClarificationHandler for PromptClarifier<R> {
    async fn answer(&self, topic: &str, questions: &[ClarifyingQuestion]) -> BTreeMap<String, String> {
        let mut lines = self.lines.lock().await;
        let mut answers = BTreeMap::new();

        eprintln!("\nA few questions to focus the research on \"{}\":", topic);
        eprintln!("(press Enter to accept the suggested default)\n");

        for question in questions {
            if question.default.is_empty() {
                eprint!("  {} ", question.question);
            } else {
                eprint!("  {} [{}] ", question.question, question.default);
            }

            match lines.next_line().await {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    answers.insert(question.key.clone(), line.trim().to_string());
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    eprintln!();
                    break;
                }
                Err(e) => {
                    log::warn!("Failed to read answer: {}", e);
                    break;
                }
            }
        }
        eprintln!();

        answers
    }
}
