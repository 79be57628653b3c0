//! Per-query summarization of search results into cited prose.

use super::SearchQuery;
use super::prompts;
use super::sources::{Citation, find_markers};
use crate::brain::{Brain, ModelRole, StructuredOutput};
use crate::error::ResearchError;
use crate::search::RawResult;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;

/// The condensed, cited findings for one query.
///
/// Markers in `text` are local: `[n]` refers to `citations[n - 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchSummary {
    pub query: SearchQuery,
    pub text: String,
    pub citations: Vec<Citation>,
}

impl ResearchSummary {
    /// The summary recorded when a search returned nothing.
    pub fn no_results(query: SearchQuery) -> Self {
        let text = format!("No information was found for \"{}\".", query.text);
        Self {
            query,
            text,
            citations: Vec::new(),
        }
    }

    /// The first marker in `text` with no matching citation.
    pub fn unresolved_marker(&self) -> Option<usize> {
        find_markers(&self.text)
            .into_iter()
            .find(|&n| n == 0 || n > self.citations.len())
    }

    /// Whether every marker in `text` resolves to one of `citations`.
    pub fn markers_resolve(&self) -> bool {
        self.unresolved_marker().is_none()
    }
}

#[derive(Debug, Deserialize)]
struct SummaryOutput {
    summary: String,
}

impl StructuredOutput for SummaryOutput {
    const NAME: &'static str = "cited_summary";
    const SCHEMA: &'static str = r#"{
  "summary": "string, prose citing results as [n]"
}"#;

    fn validate(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("summary is empty".to_string());
        }
        Ok(())
    }
}

/// Render results as the numbered list the model cites from.
pub fn format_results(results: &[RawResult]) -> String {
    let mut out = String::new();
    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{}] {}\nURL: {}\n{}\n",
            i + 1,
            result.title,
            result.url,
            result.content_snippet
        );
    }
    out
}

pub struct Summarizer {
    brain: Arc<Brain>,
}

impl Summarizer {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    pub async fn summarize(
        &self,
        topic: &str,
        query: SearchQuery,
        results: &[RawResult],
    ) -> Result<ResearchSummary, ResearchError> {
        if results.is_empty() {
            return Ok(ResearchSummary::no_results(query));
        }

        let instructions = prompts::summarizer(topic, &prompts::current_date());
        let prompt = format!(
            "Search query: {}\n\nResults:\n{}",
            query.text,
            format_results(results)
        );
        let output: SummaryOutput = self
            .brain
            .generate_structured(ModelRole::Summarizer, &instructions, &prompt)
            .await
            .map_err(|e| ResearchError::Summarization {
                query: query.text.clone(),
                message: e.to_string(),
            })?;

        let summary = ResearchSummary {
            text: output.summary.trim().to_string(),
            citations: results
                .iter()
                .enumerate()
                .map(|(i, r)| Citation::from_result(i + 1, r))
                .collect(),
            query,
        };
        if let Some(bad) = summary.unresolved_marker() {
            return Err(ResearchError::Summarization {
                message: format!("cited [{bad}] but only {} results exist", results.len()),
                query: summary.query.text,
            });
        }
        Ok(summary)
    }
}
