//! Consolidation engine: the per-trace (tier, status) state machine.
//!
//! A pass evaluates every live trace against the transition rules and
//! applies at most one adjacent transition per trace. All writes go
//! through the repository's conditional transition, so concurrent passes
//! cannot double-apply a rule and re-running a pass against unchanged
//! data produces zero transitions.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::TraceResult;
use crate::domain::models::{ConsolidationConfig, ExecutionTrace, TraceStatus, TraceTier};
use crate::domain::ports::TraceRepository;

/// One applied transition.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub trace_id: Uuid,
    pub from: (TraceTier, TraceStatus),
    pub to: (TraceTier, TraceStatus),
}

/// Outcome of one consolidation pass.
#[derive(Debug, Clone, Default)]
pub struct ConsolidationReport {
    /// Traces examined.
    pub evaluated: u64,
    /// Applied tier/status transitions.
    pub transitions: Vec<TransitionRecord>,
    /// Traces deleted after the archival aging period.
    pub deleted: Vec<Uuid>,
}

impl ConsolidationReport {
    /// True when the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.transitions.is_empty() && self.deleted.is_empty()
    }

    /// Number of tier promotions (high→mid, mid→low, low→ultra-low).
    pub fn promotions(&self) -> usize {
        self.transitions.iter().filter(|t| t.from.0 != t.to.0).count()
    }
}

/// Evaluates traces against the tier-transition rules.
pub struct ConsolidationEngine<R: TraceRepository> {
    repo: Arc<R>,
    config: ConsolidationConfig,
}

impl<R: TraceRepository> ConsolidationEngine<R> {
    pub fn new(repo: Arc<R>, config: ConsolidationConfig) -> Self {
        Self { repo, config }
    }

    /// Run one full consolidation pass. Idempotent: with no new outcomes
    /// since the previous pass, no transitions are produced.
    pub async fn run_pass(&self) -> TraceResult<ConsolidationReport> {
        let mut report = ConsolidationReport::default();

        for trace in self.repo.list_by_status(TraceStatus::Active).await? {
            report.evaluated += 1;
            let from = (trace.tier, trace.status);
            if let Some(to) = self.evaluate_active(&trace) {
                if self.repo.transition(trace.id, from, to).await? {
                    tracing::info!(
                        trace_id = %trace.id,
                        from_tier = from.0.as_str(),
                        from_status = from.1.as_str(),
                        to_tier = to.0.as_str(),
                        to_status = to.1.as_str(),
                        "trace transitioned"
                    );
                    report.transitions.push(TransitionRecord { trace_id: trace.id, from, to });
                }
            }
            if trace.usage_count != trace.consolidated_usage {
                self.repo.set_consolidated_usage(trace.id, trace.usage_count).await?;
            }
        }

        for trace in self.repo.list_by_status(TraceStatus::ArchivedCandidate).await? {
            report.evaluated += 1;
            if trace.days_in_status() > self.config.archive_after_days {
                let from = (trace.tier, TraceStatus::ArchivedCandidate);
                let to = (trace.tier, TraceStatus::Archived);
                if self.repo.transition(trace.id, from, to).await? {
                    report.transitions.push(TransitionRecord { trace_id: trace.id, from, to });
                }
            }
        }

        for trace in self.repo.list_by_status(TraceStatus::Archived).await? {
            report.evaluated += 1;
            // Ultra-low traces are never automatically deleted.
            if trace.tier != TraceTier::UltraLow
                && trace.days_in_status() > self.config.delete_after_days
            {
                self.repo.delete(trace.id).await?;
                tracing::info!(trace_id = %trace.id, "archived trace aged out and deleted");
                report.deleted.push(trace.id);
            }
        }

        Ok(report)
    }

    /// Record the explicit approval signal required before a low-tier
    /// trace may be promoted to ultra-low. Never applied automatically.
    pub async fn approve_fundamental(&self, id: Uuid) -> TraceResult<()> {
        self.repo.set_fundamental(id, true).await
    }

    /// Pick the single applicable transition for an active trace, if any.
    fn evaluate_active(&self, trace: &ExecutionTrace) -> Option<(TraceTier, TraceStatus)> {
        let c = &self.config;
        match trace.tier {
            TraceTier::High => {
                // Aged out without ever consolidating.
                if trace.age_days() > c.high_archive_days {
                    return Some((TraceTier::High, TraceStatus::Archived));
                }
                let last_success = trace.recent_outcomes.last().copied().unwrap_or(false);
                if last_success
                    && trace.confidence >= c.mid_confidence
                    && trace.validate().is_ok()
                {
                    return Some((TraceTier::Mid, TraceStatus::Active));
                }
                None
            }
            TraceTier::Mid => {
                // Demotion first: a recently unreliable trace must not be
                // promoted on its lifetime stats.
                let windowed = trace
                    .recent_success_rate(c.recent_window)
                    .unwrap_or(trace.success_rate);
                let unreliable = trace.usage_count > 0 && windowed < c.demote_success_rate;
                let stale =
                    trace.usage_count < c.stale_usage && trace.age_days() > c.stale_age_days;
                if unreliable || stale {
                    return Some((TraceTier::Mid, TraceStatus::ArchivedCandidate));
                }
                if trace.usage_count >= c.low_usage
                    && trace.success_rate >= c.low_success_rate
                    && trace.confidence >= c.low_confidence
                    && trace.distinct_context_count() >= c.low_contexts
                {
                    return Some((TraceTier::Low, TraceStatus::Active));
                }
                None
            }
            TraceTier::Low => {
                // A fresh validation batch with degraded reliability goes
                // to manual review.
                let new_batch = trace.usage_count > trace.consolidated_usage;
                if new_batch && trace.success_rate < c.review_success_rate {
                    return Some((TraceTier::Low, TraceStatus::FlaggedForReview));
                }
                if trace.fundamental
                    && trace.usage_count >= c.ultra_usage
                    && trace.success_rate >= c.ultra_success_rate
                    && trace.confidence >= c.ultra_confidence
                {
                    return Some((TraceTier::UltraLow, TraceStatus::Active));
                }
                None
            }
            TraceTier::UltraLow => None,
        }
    }
}
