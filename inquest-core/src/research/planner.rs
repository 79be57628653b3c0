//! Query planning: turn a topic into a small set of distinct search queries.

use super::SearchQuery;
use super::prompts;
use crate::brain::{Brain, ModelRole, StructuredOutput};
use crate::error::ResearchError;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// The planner's result for one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub rationale: String,
    pub queries: Vec<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct PlannerOutput {
    #[serde(default)]
    rationale: String,
    #[serde(alias = "queries")]
    query: Vec<String>,
}

impl StructuredOutput for PlannerOutput {
    const NAME: &'static str = "search_query_list";
    const SCHEMA: &'static str = r#"{
  "rationale": "string, why these queries cover the topic",
  "query": ["string, one web search query", "..."]
}"#;

    fn validate(&self) -> Result<(), String> {
        if self.query.iter().all(|q| q.trim().is_empty()) {
            return Err("query list is empty".to_string());
        }
        Ok(())
    }
}

/// Collapse case, punctuation and whitespace so near-identical phrasings compare equal.
pub fn normalize_query(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop blank and near-duplicate queries, keep the first `cap` in order.
pub fn dedupe_queries(raw: &[String], cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(normalize_query(q)))
        .take(cap)
        .map(str::to_string)
        .collect()
}

pub struct QueryPlanner {
    brain: Arc<Brain>,
}

impl QueryPlanner {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    /// Produce at most `query_count` queries for `topic`.
    pub async fn plan(&self, topic: &str, query_count: usize) -> Result<QueryPlan, ResearchError> {
        if query_count == 0 {
            return Err(ResearchError::Planning {
                message: "query_count must be at least 1".to_string(),
            });
        }

        let instructions = prompts::query_writer(query_count, &prompts::current_date());
        let output: PlannerOutput = self
            .brain
            .generate_structured(
                ModelRole::QueryGenerator,
                &instructions,
                &format!("Topic: {topic}"),
            )
            .await
            .map_err(|e| ResearchError::Planning {
                message: e.to_string(),
            })?;

        let texts = dedupe_queries(&output.query, query_count);
        if texts.is_empty() {
            return Err(ResearchError::Planning {
                message: "planner returned no usable queries".to_string(),
            });
        }
        debug!(
            requested = query_count,
            produced = output.query.len(),
            kept = texts.len(),
            "Planned search queries"
        );

        let rationale = output.rationale.trim().to_string();
        Ok(QueryPlan {
            queries: texts
                .into_iter()
                .map(|text| SearchQuery::new(text, rationale.clone()))
                .collect(),
            rationale,
        })
    }

    /// The single-query plan used when planning fails and fallback is enabled.
    pub fn fallback(topic: &str) -> QueryPlan {
        let rationale = "Planning failed; searching the topic verbatim.".to_string();
        QueryPlan {
            queries: vec![SearchQuery::new(topic.trim(), rationale.clone())],
            rationale,
        }
    }
}
