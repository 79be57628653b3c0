//! Sufficiency evaluation: decide whether the evidence answers the topic.

use super::SearchQuery;
use super::planner::dedupe_queries;
use super::prompts;
use super::summarizer::ResearchSummary;
use crate::brain::{Brain, ModelRole, StructuredOutput};
use crate::error::ResearchError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// The evaluator's verdict after normalization.
///
/// `is_sufficient` is true exactly when `follow_up_queries` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionOutcome {
    pub is_sufficient: bool,
    pub knowledge_gap: String,
    pub follow_up_queries: Vec<SearchQuery>,
}

/// The judgment as the model reported it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReflection {
    pub is_sufficient: bool,
    #[serde(default)]
    pub knowledge_gap: String,
    #[serde(default)]
    pub follow_up_queries: Vec<String>,
}

impl StructuredOutput for RawReflection {
    const NAME: &'static str = "reflection";
    const SCHEMA: &'static str = r#"{
  "is_sufficient": true or false,
  "knowledge_gap": "string, what is missing (empty when sufficient)",
  "follow_up_queries": ["string, self-contained search query", "..."]
}"#;
}

impl ReflectionOutcome {
    /// Enforce the sufficiency invariant on a raw judgment.
    ///
    /// Sufficient verdicts lose their queries. Insufficient verdicts without
    /// usable queries get one that restates the gap (or the topic, if the gap is
    /// blank). At most `max_follow_ups` queries survive.
    pub fn normalize(raw: RawReflection, topic: &str, max_follow_ups: usize) -> Self {
        let knowledge_gap = raw.knowledge_gap.trim().to_string();
        if raw.is_sufficient {
            return Self {
                is_sufficient: true,
                knowledge_gap,
                follow_up_queries: Vec::new(),
            };
        }

        let rationale = if knowledge_gap.is_empty() {
            "Evidence judged insufficient.".to_string()
        } else {
            knowledge_gap.clone()
        };
        let mut texts = dedupe_queries(&raw.follow_up_queries, max_follow_ups.max(1));
        if texts.is_empty() {
            let restated = if knowledge_gap.is_empty() {
                topic.trim().to_string()
            } else {
                format!("{} {}", topic.trim(), knowledge_gap)
            };
            texts.push(restated);
        }

        Self {
            is_sufficient: false,
            knowledge_gap,
            follow_up_queries: texts
                .into_iter()
                .map(|text| SearchQuery::new(text, rationale.clone()))
                .collect(),
        }
    }
}

/// Render accumulated summaries for the evaluator and the composer.
pub fn format_summaries(summaries: &[ResearchSummary]) -> String {
    summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("### Summary {} (query: {})\n{}", i + 1, s.query.text, s.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct SufficiencyEvaluator {
    brain: Arc<Brain>,
    max_follow_ups: usize,
}

impl SufficiencyEvaluator {
    pub fn new(brain: Arc<Brain>, max_follow_ups: usize) -> Self {
        Self {
            brain,
            max_follow_ups,
        }
    }

    pub async fn evaluate(
        &self,
        topic: &str,
        summaries: &[ResearchSummary],
    ) -> Result<ReflectionOutcome, ResearchError> {
        let raw: RawReflection = self
            .brain
            .generate_structured(
                ModelRole::Reflection,
                &prompts::reflection(topic),
                &format!("Summaries:\n\n{}", format_summaries(summaries)),
            )
            .await
            .map_err(|e| ResearchError::Evaluation {
                message: e.to_string(),
            })?;

        let raw_query_count = raw.follow_up_queries.len();
        let outcome = ReflectionOutcome::normalize(raw, topic, self.max_follow_ups);
        debug!(
            is_sufficient = outcome.is_sufficient,
            raw_queries = raw_query_count,
            follow_ups = outcome.follow_up_queries.len(),
            "Evaluated evidence"
        );
        Ok(outcome)
    }
}
