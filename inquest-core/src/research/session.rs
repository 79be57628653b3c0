//! Research run state machine and accumulated evidence.
//!
//! `ResearchState` is owned by the engine for one run. Evidence is only ever
//! appended: each fan-in produces a new state via [`ResearchState::absorb`].

use super::SearchQuery;
use super::reflection::ReflectionOutcome;
use super::sources::{CitationRegistry, rewrite_markers};
use super::summarizer::ResearchSummary;
use crate::error::{FailureKind, ResearchError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Current phase of a research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    Planning,
    Searching,
    Summarizing,
    Evaluating,
    Done,
    Failed,
}

impl ResearchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchPhase::Planning => "planning",
            ResearchPhase::Searching => "searching",
            ResearchPhase::Summarizing => "summarizing",
            ResearchPhase::Evaluating => "evaluating",
            ResearchPhase::Done => "done",
            ResearchPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchPhase::Done | ResearchPhase::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ResearchPhase) -> bool {
        use ResearchPhase::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Planning, Searching)
            | (Searching, Summarizing)
            | (Summarizing, Evaluating)
            | (Evaluating, Searching)
            | (Evaluating, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run stopped looping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Sufficient,
    BudgetExhausted,
}

/// What the engine does after an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopDecision {
    Continue(Vec<SearchQuery>),
    Done(TerminationReason),
}

/// Decide the transition out of `Evaluating`.
///
/// `loop_count` already includes the evaluation just completed. A follow-up
/// batch runs only while `loop_count <= max_loops`, so at most `max_loops`
/// follow-up batches are dispatched and budget exhaustion wins over
/// insufficiency.
pub fn next_after_evaluation(
    outcome: &ReflectionOutcome,
    loop_count: usize,
    max_loops: usize,
) -> LoopDecision {
    if outcome.is_sufficient || outcome.follow_up_queries.is_empty() {
        LoopDecision::Done(TerminationReason::Sufficient)
    } else if loop_count > max_loops {
        LoopDecision::Done(TerminationReason::BudgetExhausted)
    } else {
        LoopDecision::Continue(outcome.follow_up_queries.clone())
    }
}

/// A query whose search or summarization failed within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub query: String,
    pub kind: FailureKind,
    pub message: String,
}

impl QueryFailure {
    pub fn from_error(query: &SearchQuery, error: &ResearchError) -> Self {
        Self {
            query: query.text.clone(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// The settled result of one fan-out, in dispatch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub dispatched: usize,
    pub summaries: Vec<ResearchSummary>,
    pub failures: Vec<QueryFailure>,
}

impl BatchOutcome {
    pub fn all_failed(&self) -> bool {
        self.dispatched > 0 && self.summaries.is_empty()
    }
}

/// Everything one run has accumulated.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchState {
    topic: String,
    phase: ResearchPhase,
    summaries: Vec<ResearchSummary>,
    citations: CitationRegistry,
    failures: Vec<QueryFailure>,
    loop_count: usize,
    max_loops: usize,
    batches: usize,
}

impl ResearchState {
    pub fn new(topic: impl Into<String>, max_loops: usize) -> Self {
        Self {
            topic: topic.into(),
            phase: ResearchPhase::Planning,
            summaries: Vec::new(),
            citations: CitationRegistry::new(),
            failures: Vec::new(),
            loop_count: 0,
            max_loops,
            batches: 0,
        }
    }

    /// Append a settled batch. Prior summaries and citations are kept as-is.
    pub fn absorb(mut self, batch: BatchOutcome) -> Self {
        for summary in &batch.summaries {
            debug_assert!(summary.markers_resolve(), "summary cites a missing source");
            self.citations.merge(&summary.citations);
        }
        self.summaries.extend(batch.summaries);
        self.failures.extend(batch.failures);
        self.batches += 1;
        self
    }

    /// Count one completed evaluation.
    pub fn record_evaluation(mut self) -> Self {
        self.loop_count += 1;
        self
    }

    pub fn transition(&mut self, next: ResearchPhase) -> Result<(), ResearchError> {
        if !self.phase.can_transition_to(next) {
            return Err(ResearchError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        info!(from = %self.phase, to = %next, loop_count = self.loop_count, "Research phase change");
        self.phase = next;
        Ok(())
    }

    /// Move to `Failed` unless the run already ended.
    pub fn fail(&mut self, error: &ResearchError) {
        if self.phase.is_terminal() {
            return;
        }
        debug!(phase = %self.phase, kind = %error.kind(), "Research state failed");
        self.phase = ResearchPhase::Failed;
    }

    /// A summary's text with its local markers replaced by run-wide numbers.
    pub fn globalize(&self, summary: &ResearchSummary) -> String {
        rewrite_markers(&summary.text, |local| {
            summary
                .citations
                .get(local.checked_sub(1)?)
                .and_then(|c| self.citations.number_for(&c.url))
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn phase(&self) -> ResearchPhase {
        self.phase
    }

    pub fn summaries(&self) -> &[ResearchSummary] {
        &self.summaries
    }

    pub fn citations(&self) -> &CitationRegistry {
        &self.citations
    }

    pub fn failures(&self) -> &[QueryFailure] {
        &self.failures
    }

    pub fn loop_count(&self) -> usize {
        self.loop_count
    }

    pub fn max_loops(&self) -> usize {
        self.max_loops
    }

    pub fn batches(&self) -> usize {
        self.batches
    }
}

/// Observer for research progress.
pub trait ResearchCallback: Send + Sync {
    /// Called after every phase transition.
    fn on_phase_change(&self, phase: ResearchPhase, loop_count: usize);
    /// Called when one query of a batch fails and is dropped.
    fn on_query_failed(&self, failure: &QueryFailure);
    /// Called after a batch is absorbed, with the new summary total.
    fn on_batch_complete(&self, batch: usize, new_summaries: usize, total_summaries: usize);
    /// Called with every normalized evaluation.
    fn on_evaluation(&self, loop_count: usize, outcome: &ReflectionOutcome);
}

/// No-op callback for testing.
pub struct NoOpResearchCallback;

impl ResearchCallback for NoOpResearchCallback {
    fn on_phase_change(&self, _phase: ResearchPhase, _loop_count: usize) {}
    fn on_query_failed(&self, _failure: &QueryFailure) {}
    fn on_batch_complete(&self, _batch: usize, _new: usize, _total: usize) {}
    fn on_evaluation(&self, _loop_count: usize, _outcome: &ReflectionOutcome) {}
}

/// Reports progress as structured log events.
pub struct TracingResearchCallback;

impl ResearchCallback for TracingResearchCallback {
    fn on_phase_change(&self, phase: ResearchPhase, loop_count: usize) {
        info!(phase = %phase, loop_count, "Research progress");
    }

    fn on_query_failed(&self, failure: &QueryFailure) {
        debug!(
            query = failure.query.as_str(),
            kind = %failure.kind,
            error = failure.message.as_str(),
            "Query dropped from batch"
        );
    }

    fn on_batch_complete(&self, batch: usize, new_summaries: usize, total_summaries: usize) {
        info!(batch, new_summaries, total_summaries, "Batch complete");
    }

    fn on_evaluation(&self, loop_count: usize, outcome: &ReflectionOutcome) {
        info!(
            loop_count,
            is_sufficient = outcome.is_sufficient,
            follow_ups = outcome.follow_up_queries.len(),
            knowledge_gap = outcome.knowledge_gap.as_str(),
            "Evaluation complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::sources::{Citation, marker};

    fn summary(query: &str, text: &str, urls: &[&str]) -> ResearchSummary {
        ResearchSummary {
            query: SearchQuery::new(query, ""),
            text: text.into(),
            citations: urls
                .iter()
                .enumerate()
                .map(|(i, u)| Citation {
                    marker: marker(i + 1),
                    url: u.to_string(),
                    title: u.to_string(),
                    snippet: String::new(),
                })
                .collect(),
        }
    }

    fn outcome(sufficient: bool) -> ReflectionOutcome {
        ReflectionOutcome {
            is_sufficient: sufficient,
            knowledge_gap: String::new(),
            follow_up_queries: if sufficient {
                vec![]
            } else {
                vec![SearchQuery::new("next", "")]
            },
        }
    }

    #[test]
    fn test_legal_transitions() {
        use ResearchPhase::*;
        assert!(Planning.can_transition_to(Searching));
        assert!(Evaluating.can_transition_to(Searching));
        assert!(Evaluating.can_transition_to(Done));
        assert!(Summarizing.can_transition_to(Failed));
        assert!(!Planning.can_transition_to(Evaluating));
        assert!(!Done.can_transition_to(Searching));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Searching.can_transition_to(Done));
    }

    #[test]
    fn test_illegal_transition_errors() {
        let mut state = ResearchState::new("t", 1);
        let err = state.transition(ResearchPhase::Done).unwrap_err();
        assert!(matches!(err, ResearchError::InvalidStateTransition { .. }));
        assert_eq!(state.phase(), ResearchPhase::Planning);
    }

    #[test]
    fn test_next_after_evaluation() {
        assert_eq!(
            next_after_evaluation(&outcome(true), 1, 3),
            LoopDecision::Done(TerminationReason::Sufficient)
        );
        assert!(matches!(
            next_after_evaluation(&outcome(false), 1, 1),
            LoopDecision::Continue(_)
        ));
        assert_eq!(
            next_after_evaluation(&outcome(false), 2, 1),
            LoopDecision::Done(TerminationReason::BudgetExhausted)
        );
        assert_eq!(
            next_after_evaluation(&outcome(false), 1, 0),
            LoopDecision::Done(TerminationReason::BudgetExhausted)
        );
    }

    #[test]
    fn test_absorb_is_append_only() {
        let state = ResearchState::new("t", 1).absorb(BatchOutcome {
            dispatched: 1,
            summaries: vec![summary("a", "x [1]", &["https://1", "https://2"])],
            failures: vec![],
        });
        let before = state.summaries().to_vec();
        let state = state.absorb(BatchOutcome {
            dispatched: 2,
            summaries: vec![summary("b", "y [1]", &["https://2"])],
            failures: vec![QueryFailure {
                query: "c".into(),
                kind: FailureKind::SearchFailure,
                message: "boom".into(),
            }],
        });
        assert_eq!(&state.summaries()[..before.len()], &before[..]);
        assert_eq!(state.summaries().len(), 2);
        assert_eq!(state.citations().len(), 2);
        assert_eq!(state.failures().len(), 1);
        assert_eq!(state.batches(), 2);
    }

    #[test]
    fn test_globalize_uses_registry_numbers() {
        let state = ResearchState::new("t", 1).absorb(BatchOutcome {
            dispatched: 2,
            summaries: vec![
                summary("a", "first [1] second [2]", &["https://a", "https://b"]),
                summary("b", "again [1] new [2]", &["https://b", "https://c"]),
            ],
            failures: vec![],
        });
        assert_eq!(state.globalize(&state.summaries()[1]), "again [2] new [3]");
        assert_eq!(state.globalize(&state.summaries()[0]), "first [1] second [2]");
    }

    #[test]
    fn test_record_evaluation_and_fail() {
        let mut state = ResearchState::new("t", 0).record_evaluation();
        assert_eq!(state.loop_count(), 1);
        state.fail(&ResearchError::Cancelled);
        assert_eq!(state.phase(), ResearchPhase::Failed);
    }

    #[test]
    fn test_batch_all_failed() {
        let batch = BatchOutcome {
            dispatched: 2,
            ..Default::default()
        };
        assert!(batch.all_failed());
        assert!(!BatchOutcome::default().all_failed());
    }
}
