//! Dispatcher: the replay-vs-delegate decision point.
//!
//! Given a goal, the dispatcher ranks stored traces and either replays
//! the best candidate (follower mode) or delegates the goal to the
//! external reasoning engine (learner mode), synthesizing a new trace
//! from a successful delegated run. The decision is deterministic for a
//! fixed store snapshot and fixed thresholds.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::errors::{TraceError, TraceResult};
use crate::domain::models::{rank_candidates, DispatchConfig, ScoredTrace, TraceStats};
use crate::domain::ports::{ReasoningEngine, TraceRepository};
use crate::services::replay_executor::{ReplayExecutor, ReplayReport, ReplayStatus};
use crate::services::synthesizer::TraceSynthesizer;

/// How a goal was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Deterministic replay of a stored trace.
    Follower,
    /// Delegation to the external reasoning engine.
    Learner,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follower => "follower",
            Self::Learner => "learner",
        }
    }
}

/// Result payload of a dispatch.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// Follower mode: the trace that was replayed and its report.
    Replayed {
        trace_id: Uuid,
        report: ReplayReport,
    },
    /// Learner mode: whether the delegated run succeeded, and the trace
    /// synthesized from it, if any.
    Learned {
        success: bool,
        synthesized_trace: Option<Uuid>,
        /// Set when a replay was escalated before falling back.
        escalated_from: Option<Uuid>,
    },
}

/// The operational `(mode, result)` pair.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub mode: DispatchMode,
    pub result: DispatchResult,
}

/// Failure classes the dispatcher surfaces to its caller. "No usable
/// trace" is the routine fallback signal (an error only when no engine is
/// wired); a mid-replay abort carries the failing step and what had
/// already committed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no usable trace found for goal")]
    NoUsableTrace,

    #[error("replay of trace {trace_id} aborted at step {failed_step}: {message}")]
    ReplayAborted {
        trace_id: Uuid,
        failed_step: Uuid,
        message: String,
        /// Steps whose side effects had already committed.
        committed: Vec<Uuid>,
    },

    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Preview of the routing decision for a goal, without executing it.
#[derive(Debug, Clone)]
pub struct DispatchDecision {
    pub mode: DispatchMode,
    /// The winning candidate, when one cleared the match floor.
    pub candidate: Option<CandidateSummary>,
}

/// Compact view of a ranked candidate.
#[derive(Debug, Clone)]
pub struct CandidateSummary {
    pub trace_id: Uuid,
    pub goal_signature: String,
    pub similarity: f64,
    pub score: f64,
    pub confidence: f64,
    pub success_rate: f64,
}

/// Routes goals to replay or delegation.
pub struct Dispatcher<R>
where
    R: TraceRepository + 'static,
{
    repo: Arc<R>,
    executor: ReplayExecutor<R>,
    engine: Arc<dyn ReasoningEngine>,
    synthesizer: TraceSynthesizer,
    config: DispatchConfig,
}

impl<R> Dispatcher<R>
where
    R: TraceRepository + 'static,
{
    pub fn new(
        repo: Arc<R>,
        executor: ReplayExecutor<R>,
        engine: Arc<dyn ReasoningEngine>,
        synthesizer: TraceSynthesizer,
        config: DispatchConfig,
    ) -> Self {
        Self { repo, executor, engine, synthesizer, config }
    }

    /// Route a goal. `context` labels the dispatch origin for the
    /// distinct-context consolidation gate; it defaults to a
    /// normalization of the goal text.
    pub async fn dispatch(
        &self,
        goal: &str,
        context: Option<&str>,
    ) -> Result<DispatchReport, DispatchError> {
        let owned_context;
        let context = match context {
            Some(c) => c,
            None => {
                owned_context = normalize_context(goal);
                owned_context.as_str()
            }
        };

        let best = self.best_candidate(goal).await?;

        if let Some(candidate) = &best {
            if self.follows(candidate) {
                tracing::info!(
                    goal,
                    trace_id = %candidate.trace.id,
                    score = candidate.score,
                    "dispatching in follower mode"
                );
                let report = self
                    .executor
                    .execute(&candidate.trace, Some(context))
                    .await?;

                return match report.status {
                    ReplayStatus::Escalated => {
                        // The trace asked for a learner retry of this goal.
                        tracing::warn!(goal, trace_id = %candidate.trace.id,
                            "replay escalated, retrying in learner mode");
                        self.learn(goal, Some(candidate.trace.id)).await
                    }
                    ReplayStatus::Failed => Err(DispatchError::ReplayAborted {
                        trace_id: candidate.trace.id,
                        failed_step: report.failed_step.unwrap_or(candidate.trace.id),
                        message: report
                            .error
                            .clone()
                            .unwrap_or_else(|| "replay failed".to_string()),
                        committed: report.committed.clone(),
                    }),
                    ReplayStatus::Success | ReplayStatus::Cancelled => Ok(DispatchReport {
                        mode: DispatchMode::Follower,
                        result: DispatchResult::Replayed {
                            trace_id: candidate.trace.id,
                            report,
                        },
                    }),
                };
            }
        }

        tracing::debug!(goal, matched = best.is_some(), "dispatching in learner mode");
        self.learn(goal, None).await
    }

    /// Preview which way a goal would be routed. Deterministic for a
    /// fixed store snapshot and fixed thresholds: `dispatch` with the
    /// same snapshot takes exactly this route.
    pub async fn decide(&self, goal: &str) -> TraceResult<DispatchDecision> {
        let best = self.best_candidate(goal).await?;
        let mode = match &best {
            Some(candidate) if self.follows(candidate) => DispatchMode::Follower,
            _ => DispatchMode::Learner,
        };
        Ok(DispatchDecision {
            mode,
            candidate: best.map(|c| CandidateSummary {
                trace_id: c.trace.id,
                goal_signature: c.trace.goal_signature.clone(),
                similarity: c.similarity,
                score: c.score,
                confidence: c.trace.confidence,
                success_rate: c.trace.success_rate,
            }),
        })
    }

    /// Operational surface: compact stats for a trace.
    pub async fn trace_stats(&self, id: Uuid) -> TraceResult<TraceStats> {
        let trace = self
            .repo
            .get(id)
            .await?
            .ok_or(TraceError::TraceNotFound(id))?;
        Ok(trace.stats())
    }

    /// The highest-ranked searchable candidate for a goal, if any clears
    /// the minimum match floor.
    async fn best_candidate(&self, goal: &str) -> TraceResult<Option<ScoredTrace>> {
        let candidates = self.repo.candidates().await?;
        let ranked = rank_candidates(goal, candidates);
        Ok(ranked
            .into_iter()
            .next()
            .filter(|c| c.similarity >= self.config.min_match_score))
    }

    /// The follower-mode decision rule.
    fn follows(&self, candidate: &ScoredTrace) -> bool {
        candidate.trace.confidence >= self.config.follower_threshold
            && candidate.trace.success_rate >= self.config.min_success_rate
    }

    /// Delegate to the reasoning engine; synthesize and store a trace
    /// from a successful run.
    async fn learn(
        &self,
        goal: &str,
        escalated_from: Option<Uuid>,
    ) -> Result<DispatchReport, DispatchError> {
        let run = match self.engine.execute_goal(goal).await {
            Ok(run) => run,
            Err(TraceError::EngineUnavailable(_)) if escalated_from.is_none() => {
                return Err(DispatchError::NoUsableTrace);
            }
            Err(e) => return Err(e.into()),
        };

        let synthesized = self.synthesizer.synthesize(goal, &run.log, run.success)?;

        let synthesized_trace = match synthesized {
            Some(trace) => Some(self.repo.put(&trace).await?.id),
            None => None,
        };

        Ok(DispatchReport {
            mode: DispatchMode::Learner,
            result: DispatchResult::Learned {
                success: run.success,
                synthesized_trace,
                escalated_from,
            },
        })
    }
}

/// Context label derived from the goal text: lowercase words joined by a
/// single space, so superficial formatting differences collapse into one
/// context.
fn normalize_context(goal: &str) -> String {
    goal.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}
