//! Report composition and the final cited document.

use super::prompts;
use super::reflection::format_summaries;
use super::session::ResearchState;
use super::sources::{Citation, CitationRegistry, find_markers, rewrite_markers};
use super::summarizer::ResearchSummary;
use crate::brain::{Brain, ModelRole, StructuredOutput};
use crate::error::ResearchError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// The terminal artifact of a run.
///
/// Every marker in `body` is `[n]` with `1 <= n <= citations.len()`, and
/// `citations[n - 1].marker == "[n]"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub topic: String,
    pub body: String,
    pub citations: Vec<Citation>,
}

impl FinalReport {
    /// Title, body and a numbered sources list as markdown.
    pub fn render_markdown(&self) -> String {
        let mut out = format!("# {}\n\n{}\n", self.topic.trim(), self.body.trim_end());
        if !self.citations.is_empty() {
            out.push_str("\n## Sources\n\n");
            for citation in &self.citations {
                let title = if citation.title.trim().is_empty() {
                    citation.url.as_str()
                } else {
                    citation.title.trim()
                };
                let _ = writeln!(out, "{} [{}]({})", citation.marker, title, citation.url);
            }
        }
        out
    }

    /// Number of sources the body actually cites.
    pub fn cited_count(&self) -> usize {
        let mut cited = find_markers(&self.body);
        cited.sort_unstable();
        cited.dedup();
        cited.len()
    }
}

#[derive(Debug, Deserialize)]
struct ReportOutput {
    report: String,
}

impl StructuredOutput for ReportOutput {
    const NAME: &'static str = "research_report";
    const SCHEMA: &'static str = r#"{
  "report": "string, the full markdown report citing sources as [n]"
}"#;

    fn validate(&self) -> Result<(), String> {
        if self.report.trim().is_empty() {
            return Err("report is empty".to_string());
        }
        Ok(())
    }
}

/// Renumber `body`'s markers densely and build the matching citation list.
///
/// Markers that name no registered source are removed. The remaining ones are
/// numbered `1..=k` in order of first appearance; sources the body never cites
/// follow as `k+1..`. Returns the rewritten body, the citations and the number
/// of orphan markers removed.
pub fn normalize_body(body: &str, registry: &CitationRegistry) -> (String, Vec<Citation>, usize) {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let mut referenced: Vec<usize> = Vec::new();
    let mut orphans = 0;
    for n in find_markers(body) {
        if mapping.contains_key(&n) {
            continue;
        }
        if registry.get(n).is_some() {
            referenced.push(n);
            mapping.insert(n, referenced.len());
        } else {
            orphans += 1;
        }
    }

    let body = rewrite_markers(body, |n| mapping.get(&n).copied());

    let mut citations: Vec<Citation> = referenced
        .iter()
        .filter_map(|&old| registry.get(old))
        .enumerate()
        .map(|(i, c)| c.renumbered(i + 1))
        .collect();
    let uncited = registry
        .entries()
        .iter()
        .enumerate()
        .filter(|(i, _)| !mapping.contains_key(&(i + 1)))
        .map(|(_, c)| c.clone())
        .collect::<Vec<_>>();
    for c in uncited {
        let next = citations.len() + 1;
        citations.push(c.renumbered(next));
    }

    (body, citations, orphans)
}

/// Drop a leading `# ` title line; the renderer adds its own.
fn strip_title(body: &str) -> &str {
    let trimmed = body.trim_start();
    match trimmed.split_once('\n') {
        Some((first, rest)) if first.starts_with("# ") => rest.trim_start(),
        None if trimmed.starts_with("# ") => "",
        _ => trimmed,
    }
}

fn format_sources(registry: &CitationRegistry) -> String {
    let mut out = String::new();
    for c in registry.entries() {
        let _ = writeln!(out, "{} {} ({})", c.marker, c.title, c.url);
    }
    out
}

pub struct ReportComposer {
    brain: Arc<Brain>,
}

impl ReportComposer {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    /// Synthesize every accumulated summary into one cited report.
    pub async fn compose(
        &self,
        topic: &str,
        state: &ResearchState,
    ) -> Result<FinalReport, ResearchError> {
        if state.summaries().is_empty() {
            return Err(ResearchError::Composition {
                message: "no summaries to compose".to_string(),
            });
        }

        let globalized: Vec<ResearchSummary> = state
            .summaries()
            .iter()
            .map(|s| ResearchSummary {
                text: state.globalize(s),
                ..s.clone()
            })
            .collect();
        let prompt = format!(
            "Topic: {topic}\n\n{}\n\nSources:\n{}",
            format_summaries(&globalized),
            format_sources(state.citations())
        );

        let output: ReportOutput = self
            .brain
            .generate_structured(
                ModelRole::Answer,
                &prompts::answer(topic, &prompts::current_date()),
                &prompt,
            )
            .await
            .map_err(|e| ResearchError::Composition {
                message: e.to_string(),
            })?;

        let body = strip_title(&output.report);
        if body.trim().is_empty() {
            return Err(ResearchError::Composition {
                message: "report has no body".to_string(),
            });
        }

        let (body, citations, orphans) = normalize_body(body, state.citations());
        if orphans > 0 {
            warn!(orphans, "Removed citation markers with no matching source");
        }
        debug!(
            summaries = globalized.len(),
            citations = citations.len(),
            "Composed report"
        );

        Ok(FinalReport {
            topic: topic.trim().to_string(),
            body: body.trim().to_string(),
            citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::research::SearchQuery;
    use crate::research::session::BatchOutcome;
    use crate::research::sources::marker;
    use pretty_assertions::assert_eq;

    fn cite(n: usize, url: &str) -> Citation {
        Citation {
            marker: marker(n),
            url: url.into(),
            title: format!("T{n}"),
            snippet: String::new(),
        }
    }

    fn registry(urls: &[&str]) -> CitationRegistry {
        let mut registry = CitationRegistry::new();
        for (i, url) in urls.iter().enumerate() {
            registry.register(&cite(i + 1, url));
        }
        registry
    }

    fn state_with(summaries: Vec<ResearchSummary>) -> ResearchState {
        ResearchState::new("topic", 1).absorb(BatchOutcome {
            dispatched: summaries.len(),
            summaries,
            failures: vec![],
        })
    }

    #[test]
    fn test_normalize_renumbers_in_order_of_use() {
        let registry = registry(&["https://a", "https://b", "https://c"]);
        let (body, citations, orphans) =
            normalize_body("C first [3], then A [1], C again [3], bogus [9].", &registry);

        assert_eq!(body, "C first [1], then A [2], C again [1], bogus.");
        assert_eq!(orphans, 1);
        let urls: Vec<_> = citations.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://c", "https://a", "https://b"]);
        let markers: Vec<_> = citations.iter().map(|c| c.marker.as_str()).collect();
        assert_eq!(markers, vec!["[1]", "[2]", "[3]"]);
    }

    #[test]
    fn test_normalize_renumbers_lists_and_ranges_and_keeps_years() {
        let registry = registry(&["https://a", "https://b", "https://c"]);
        let (body, citations, orphans) = normalize_body(
            "Since [2024], B and C agree [2, 3] while [1-2] differ.",
            &registry,
        );

        assert_eq!(body, "Since [2024], B and C agree [1][2] while [3][1] differ.");
        assert_eq!(orphans, 0);
        let urls: Vec<_> = citations.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://b", "https://c", "https://a"]);
    }

    #[test]
    fn test_normalize_without_markers_keeps_all_sources() {
        let registry = registry(&["https://a", "https://b"]);
        let (body, citations, orphans) = normalize_body("Plain text.", &registry);
        assert_eq!(body, "Plain text.");
        assert_eq!(orphans, 0);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[1].marker, "[2]");
    }

    #[test]
    fn test_strip_title() {
        assert_eq!(strip_title("# Title\n\nBody"), "Body");
        assert_eq!(strip_title("## Section\nBody"), "## Section\nBody");
        assert_eq!(strip_title("# Only"), "");
    }

    #[test]
    fn test_render_markdown() {
        let report = FinalReport {
            topic: "Fusion".into(),
            body: "Works [1].".into(),
            citations: vec![cite(1, "https://f")],
        };
        assert_eq!(
            report.render_markdown(),
            "# Fusion\n\nWorks [1].\n\n## Sources\n\n[1] [T1](https://f)\n"
        );
        assert_eq!(report.cited_count(), 1);
    }

    #[tokio::test]
    async fn test_compose_uses_global_numbers() {
        let summaries = vec![
            ResearchSummary {
                query: SearchQuery::new("q1", ""),
                text: "a [1] b [2]".into(),
                citations: vec![cite(1, "https://a"), cite(2, "https://b")],
            },
            ResearchSummary {
                query: SearchQuery::new("q2", ""),
                text: "c [1]".into(),
                citations: vec![cite(1, "https://c")],
            },
        ];
        let state = state_with(summaries);

        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text(r##"{"report": "# Title\n\nOnly c matters [3]. And a [1]."}"##);
        let composer = ReportComposer::new(Arc::new(Brain::new(provider.clone())));
        let report = composer.compose("topic", &state).await.unwrap();

        assert_eq!(report.body, "Only c matters [1]. And a [2].");
        assert_eq!(report.citations[0].url, "https://c");
        assert_eq!(report.citations[1].url, "https://a");
        assert_eq!(report.citations[2].url, "https://b");

        let prompt = provider.requests()[0].user_text();
        assert!(prompt.contains("### Summary 2 (query: q2)\nc [3]"));
        assert!(prompt.contains("[3] T1 (https://c)"));
    }

    #[tokio::test]
    async fn test_compose_rejects_empty_report() {
        let state = state_with(vec![ResearchSummary::no_results(SearchQuery::new("q", ""))]);
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text(r#"{"report": "   "}"#);
        let composer = ReportComposer::new(Arc::new(Brain::new(provider)));
        let err = composer.compose("topic", &state).await.unwrap_err();
        assert!(matches!(err, ResearchError::Composition { .. }));
    }

    #[tokio::test]
    async fn test_compose_requires_summaries() {
        let composer = ReportComposer::new(Arc::new(Brain::new(Arc::new(MockLlmProvider::new()))));
        let err = composer
            .compose("topic", &ResearchState::new("topic", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Composition { .. }));
    }
}
