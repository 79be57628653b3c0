//! The research loop controller.
//!
//! Drives one run through the phase machine in [`super::session`]: plan,
//! fan out searches, fan out summaries, evaluate, and either loop with the
//! evaluator's follow-up queries or compose the report. Fan-outs are bounded
//! by `max_concurrency` and settle in dispatch order.

use super::SearchQuery;
use super::output::{FinalReport, ReportComposer};
use super::planner::QueryPlanner;
use super::reflection::SufficiencyEvaluator;
use super::session::{
    BatchOutcome, LoopDecision, NoOpResearchCallback, QueryFailure, ResearchCallback,
    ResearchPhase, ResearchState, TerminationReason, next_after_evaluation,
};
use super::summarizer::Summarizer;
use crate::brain::Brain;
use crate::config::ResearchConfig;
use crate::error::{ConfigError, InquestError, ResearchError};
use crate::search::{RawResult, SearchProvider};
use crate::types::TokenUsage;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct ResearchRun {
    pub run_id: Uuid,
    pub report: FinalReport,
    pub termination: TerminationReason,
    /// Completed evaluations.
    pub loop_count: usize,
    /// Search/summarize batches dispatched, including the initial one.
    pub batches: usize,
    pub failures: Vec<QueryFailure>,
    /// Tokens spent by this run.
    pub usage: TokenUsage,
    pub state: ResearchState,
}

pub struct ResearchEngine {
    brain: Arc<Brain>,
    search: Arc<dyn SearchProvider>,
    config: ResearchConfig,
    callback: Arc<dyn ResearchCallback>,
}

/// The generation stages of one run, sharing a brain forked for that run so
/// concurrent runs on one engine keep separate usage.
struct Stages {
    brain: Arc<Brain>,
    planner: QueryPlanner,
    summarizer: Summarizer,
    evaluator: SufficiencyEvaluator,
    composer: ReportComposer,
}

impl Stages {
    fn new(brain: Arc<Brain>, config: &ResearchConfig) -> Self {
        Self {
            planner: QueryPlanner::new(brain.clone()),
            summarizer: Summarizer::new(brain.clone()),
            evaluator: SufficiencyEvaluator::new(brain.clone(), config.max_follow_up_queries),
            composer: ReportComposer::new(brain.clone()),
            brain,
        }
    }
}

/// Race `fut` against cancellation. A cancelled future is dropped, so nothing
/// it would have produced is observed.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, ResearchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResearchError::Cancelled),
        output = fut => Ok(output),
    }
}

impl ResearchEngine {
    pub fn new(
        brain: Arc<Brain>,
        search: Arc<dyn SearchProvider>,
        config: ResearchConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            brain,
            search,
            config,
            callback: Arc::new(NoOpResearchCallback),
        })
    }

    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Research `topic` to completion, cancellation or the run deadline.
    pub async fn run(
        &self,
        topic: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchRun, InquestError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ConfigError::MissingField {
                field: "research_topic".to_string(),
            }
            .into());
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("research_run", topic, run_id = %run_id);
        let stages = Stages::new(Arc::new(self.brain.fork()), &self.config);
        let driven = self
            .drive(&stages, topic, run_id, &cancel)
            .instrument(span.clone());

        let result = match self.config.run_timeout() {
            Some(limit) => match tokio::time::timeout(limit, driven).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(ResearchError::TimedOut {
                        timeout_secs: self.config.run_timeout_secs,
                    })
                }
            },
            None => driven.await,
        };

        match result {
            Ok(mut run) => {
                run.usage = stages.brain.total_usage();
                span.in_scope(|| {
                    info!(
                        loop_count = run.loop_count,
                        batches = run.batches,
                        citations = run.report.citations.len(),
                        cited = run.report.cited_count(),
                        tokens = run.usage.total(),
                        "Research run complete"
                    );
                });
                Ok(run)
            }
            Err(e) => {
                span.in_scope(|| error!(kind = %e.kind(), error = %e, "Research run failed"));
                Err(e.into())
            }
        }
    }

    async fn drive(
        &self,
        stages: &Stages,
        topic: &str,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<ResearchRun, ResearchError> {
        let mut state = ResearchState::new(topic, self.config.max_research_loops);
        self.callback
            .on_phase_change(state.phase(), state.loop_count());

        let mut queries = match self.plan(&stages.planner, topic, cancel).await {
            Ok(queries) => queries,
            Err(e) => return Err(self.abort(&mut state, e)),
        };

        let termination = loop {
            if let Err(e) = self.enter(&mut state, ResearchPhase::Searching) {
                return Err(self.abort(&mut state, e));
            }

            let span = info_span!("batch", index = state.batches() + 1, queries = queries.len());
            let batch = self
                .run_batch(&stages.summarizer, topic, &queries, &mut state, cancel)
                .instrument(span)
                .await;
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => return Err(self.abort(&mut state, e)),
            };

            let new_summaries = batch.summaries.len();
            let failed = batch.failures.len();
            if batch.all_failed() {
                warn!(dispatched = batch.dispatched, failed, "Every query in the batch failed");
            }
            state = state.absorb(batch);
            self.callback
                .on_batch_complete(state.batches(), new_summaries, state.summaries().len());
            if state.summaries().is_empty() {
                return Err(self.abort(&mut state, ResearchError::NoEvidence { failed }));
            }

            if let Err(e) = self.enter(&mut state, ResearchPhase::Evaluating) {
                return Err(self.abort(&mut state, e));
            }
            let evaluated = cancellable(cancel, stages.evaluator.evaluate(topic, state.summaries()))
                .await
                .and_then(|r| r);
            let outcome = match evaluated {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.abort(&mut state, e)),
            };
            state = state.record_evaluation();
            self.callback.on_evaluation(state.loop_count(), &outcome);

            match next_after_evaluation(&outcome, state.loop_count(), state.max_loops()) {
                LoopDecision::Continue(next) => {
                    info!(
                        loop_count = state.loop_count(),
                        follow_ups = next.len(),
                        knowledge_gap = outcome.knowledge_gap.as_str(),
                        "Evidence insufficient, searching again"
                    );
                    queries = next;
                }
                LoopDecision::Done(reason) => {
                    if let Err(e) = self.enter(&mut state, ResearchPhase::Done) {
                        return Err(self.abort(&mut state, e));
                    }
                    break reason;
                }
            }
        };

        debug!(?termination, loop_count = state.loop_count(), "Research loop finished");
        let report = cancellable(cancel, stages.composer.compose(topic, &state))
            .await
            .and_then(|r| r)?;

        Ok(ResearchRun {
            run_id,
            report,
            termination,
            loop_count: state.loop_count(),
            batches: state.batches(),
            failures: state.failures().to_vec(),
            usage: TokenUsage::default(),
            state,
        })
    }

    async fn plan(
        &self,
        planner: &QueryPlanner,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchQuery>, ResearchError> {
        let planned = cancellable(
            cancel,
            planner.plan(topic, self.config.initial_query_count),
        )
        .await?;
        match planned {
            Ok(plan) => {
                info!(queries = plan.queries.len(), rationale = plan.rationale.as_str(), "Planned queries");
                Ok(plan.queries)
            }
            Err(e) if self.config.planner_fallback => {
                warn!(error = %e, "Query planning failed, searching the topic verbatim");
                Ok(QueryPlanner::fallback(topic).queries)
            }
            Err(e) => Err(e),
        }
    }

    /// Search every query, then summarize every successful search.
    ///
    /// Each stage waits for all of its calls to settle. Per-query failures are
    /// recorded and the remaining queries carry on.
    async fn run_batch(
        &self,
        summarizer: &Summarizer,
        topic: &str,
        queries: &[SearchQuery],
        state: &mut ResearchState,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, ResearchError> {
        let width = self.config.max_concurrency;
        let limit = self.config.max_search_results_per_query;
        let search = &self.search;

        let searched: Vec<(SearchQuery, Result<Vec<RawResult>, ResearchError>)> = cancellable(
            cancel,
            stream::iter(queries.iter().cloned())
                .map(|query| async move {
                    let result = search.search(&query.text, limit).await.map_err(|e| {
                        ResearchError::Search {
                            query: query.text.clone(),
                            message: e.to_string(),
                        }
                    });
                    (query, result)
                })
                .buffered(width)
                .collect::<Vec<_>>(),
        )
        .await?;

        let mut outcome = BatchOutcome {
            dispatched: queries.len(),
            ..Default::default()
        };
        let mut found = Vec::with_capacity(searched.len());
        for (query, result) in searched {
            match result {
                Ok(results) => {
                    debug!(query = query.text.as_str(), results = results.len(), "Search settled");
                    found.push((query, results));
                }
                Err(e) => outcome.failures.push(self.record_failure(&query, &e)),
            }
        }

        self.enter(state, ResearchPhase::Summarizing)?;

        let summarized = cancellable(
            cancel,
            stream::iter(found)
                .map(|(query, results)| async move {
                    let result = summarizer.summarize(topic, query.clone(), &results).await;
                    (query, result)
                })
                .buffered(width)
                .collect::<Vec<_>>(),
        )
        .await?;

        for (query, result) in summarized {
            match result {
                Ok(summary) => outcome.summaries.push(summary),
                Err(e) => outcome.failures.push(self.record_failure(&query, &e)),
            }
        }
        Ok(outcome)
    }

    fn record_failure(&self, query: &SearchQuery, error: &ResearchError) -> QueryFailure {
        warn!(
            query = query.text.as_str(),
            kind = %error.kind(),
            error = %error,
            "Query failed, continuing with the rest of the batch"
        );
        let failure = QueryFailure::from_error(query, error);
        self.callback.on_query_failed(&failure);
        failure
    }

    fn enter(&self, state: &mut ResearchState, phase: ResearchPhase) -> Result<(), ResearchError> {
        state.transition(phase)?;
        self.callback.on_phase_change(phase, state.loop_count());
        Ok(())
    }

    fn abort(&self, state: &mut ResearchState, error: ResearchError) -> ResearchError {
        if !state.phase().is_terminal() {
            state.fail(&error);
            self.callback
                .on_phase_change(ResearchPhase::Failed, state.loop_count());
        }
        error
    }
}
