//! Research loop: plan queries, search and summarize in parallel, evaluate
//! sufficiency, repeat within a loop budget, then compose a cited report.

pub mod engine;
pub mod output;
pub mod planner;
pub mod prompts;
pub mod reflection;
pub mod session;
pub mod sources;
pub mod summarizer;

use serde::{Deserialize, Serialize};

pub use engine::{ResearchEngine, ResearchRun};
pub use output::{FinalReport, ReportComposer};
pub use planner::{QueryPlan, QueryPlanner};
pub use reflection::{ReflectionOutcome, SufficiencyEvaluator};
pub use session::{
    BatchOutcome, LoopDecision, NoOpResearchCallback, QueryFailure, ResearchCallback,
    ResearchPhase, ResearchState, TerminationReason, TracingResearchCallback,
};
pub use sources::{Citation, CitationRegistry};
pub use summarizer::{ResearchSummary, Summarizer};

/// One web search to run, with the reason it was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub rationale: String,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rationale: rationale.into(),
        }
    }
}

impl std::fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
