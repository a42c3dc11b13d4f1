//! Execution trace domain model.
//!
//! A trace is a canonical, replayable procedure synthesized from one
//! successful run. Traces move through a reliability-tier hierarchy
//! (high → mid → low → ultra-low) as the consolidation engine observes
//! replay outcomes; unreliable or stale traces are archived and eventually
//! deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::step::Step;
use crate::domain::errors::{TraceError, TraceResult};

/// Maximum number of replay outcomes kept in the recent window.
pub const RECENT_WINDOW_CAP: usize = 20;

/// Reliability tier of a trace.
///
/// `High` is the most volatile tier where new traces start; consolidation
/// moves reliable traces toward `UltraLow`, one adjacent tier at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceTier {
    /// Freshly synthesized, unproven.
    High,
    /// Survived its first consolidation.
    Mid,
    /// Extensively validated across contexts.
    Low,
    /// Fundamental, explicitly approved. Never auto-deleted.
    UltraLow,
}

impl Default for TraceTier {
    fn default() -> Self {
        Self::High
    }
}

impl TraceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Mid => "mid",
            Self::Low => "low",
            Self::UltraLow => "ultra_low",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "high" => Some(Self::High),
            "mid" => Some(Self::Mid),
            "low" => Some(Self::Low),
            "ultra_low" | "ultra-low" => Some(Self::UltraLow),
            _ => None,
        }
    }

    /// Position in the consolidation order, `High` first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Mid => 1,
            Self::Low => 2,
            Self::UltraLow => 3,
        }
    }

    /// The next tier in consolidation order, if any.
    pub fn next_consolidated(&self) -> Option<Self> {
        match self {
            Self::High => Some(Self::Mid),
            Self::Mid => Some(Self::Low),
            Self::Low => Some(Self::UltraLow),
            Self::UltraLow => None,
        }
    }

    /// Whether a transition to `other` moves by at most one tier.
    pub fn is_adjacent(&self, other: Self) -> bool {
        self.rank().abs_diff(other.rank()) == 1
    }
}

/// Lifecycle status of a trace within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// Eligible for search and replay.
    Active,
    /// Demoted; will be archived after the aging period.
    ArchivedCandidate,
    /// Reliability dropped after a validation batch; awaiting review.
    FlaggedForReview,
    /// Removed from circulation, retained until the deletion aging period.
    Archived,
    /// Persisted document failed to parse or violated invariants.
    /// Quarantined for manual review, never silently deleted.
    Corrupt,
    /// Replaced by a newer version for the same goal signature.
    Superseded,
}

impl Default for TraceStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::ArchivedCandidate => "archived_candidate",
            Self::FlaggedForReview => "flagged_for_review",
            Self::Archived => "archived",
            Self::Corrupt => "corrupt",
            Self::Superseded => "superseded",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "archived_candidate" => Some(Self::ArchivedCandidate),
            "flagged_for_review" => Some(Self::FlaggedForReview),
            "archived" => Some(Self::Archived),
            "corrupt" => Some(Self::Corrupt),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }

    /// Whether traces in this status appear in default search results.
    pub fn is_searchable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Outcome of one replay, as reported to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every non-skipped step succeeded.
    Success,
    /// A step failed after its policy was exhausted, or replay aborted.
    Failure,
    /// Replay was cancelled by the caller or a timeout. Not evidence of
    /// unreliability: never feeds confidence decay.
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Tunable constants for the per-outcome confidence update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceParams {
    /// Gain constant `k` in `confidence += (1 - c) * k / sqrt(usage)`.
    pub gain_k: f64,
    /// Multiplicative decay applied on failure. Must be below 1.
    pub decay_factor: f64,
}

impl Default for ConfidenceParams {
    fn default() -> Self {
        Self { gain_k: 0.3, decay_factor: 0.85 }
    }
}

/// Compact per-trace statistics exposed on the operational surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStats {
    pub confidence: f64,
    pub tier: TraceTier,
    pub usage_count: u64,
    pub success_rate: f64,
}

/// A reusable, replayable procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Unique identifier.
    pub id: Uuid,
    /// Goal description this trace was synthesized for; used for matching.
    pub goal_signature: String,
    /// Reliability estimate, always in [0, 1].
    pub confidence: f64,
    /// Lifetime success rate over replays.
    pub success_rate: f64,
    /// Number of replays. Monotonically non-decreasing.
    pub usage_count: u64,
    /// Reliability tier.
    pub tier: TraceTier,
    /// Lifecycle status.
    pub status: TraceStatus,
    /// Explicit approval signal required for promotion to ultra-low.
    pub fundamental: bool,
    /// When the trace was synthesized.
    pub created_at: DateTime<Utc>,
    /// When the trace was last replayed.
    pub last_used: DateTime<Utc>,
    /// When `status` last changed; drives archival aging.
    pub status_changed_at: DateTime<Utc>,
    /// Version for this goal signature. Newer versions supersede older.
    pub version: u32,
    /// Estimated wall-clock duration of one replay, seconds. Bounds the
    /// trace-level timeout.
    pub estimated_secs: f64,
    /// Most recent replay outcomes (true = success), oldest first,
    /// bounded by [`RECENT_WINDOW_CAP`].
    pub recent_outcomes: Vec<bool>,
    /// Distinct dispatch contexts that have validated this trace.
    pub distinct_contexts: BTreeSet<String>,
    /// `usage_count` watermark recorded by the last consolidation pass.
    pub consolidated_usage: u64,
    /// Ordered step DAG.
    pub steps: Vec<Step>,
}

impl ExecutionTrace {
    /// Create a new active high-tier trace.
    ///
    /// The seed confidence is clamped to [0, 1]; enforcing the synthesis
    /// cap (≤ 0.75) is the synthesizer's contract. The synthesis run
    /// itself succeeded, so the lifetime success rate seeds at 1.0.
    pub fn new(
        goal_signature: impl Into<String>,
        steps: Vec<Step>,
        seed_confidence: f64,
        estimated_secs: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            goal_signature: goal_signature.into(),
            confidence: seed_confidence.clamp(0.0, 1.0),
            success_rate: 1.0,
            usage_count: 0,
            tier: TraceTier::High,
            status: TraceStatus::Active,
            fundamental: false,
            created_at: now,
            last_used: now,
            status_changed_at: now,
            version: 1,
            estimated_secs: estimated_secs.max(1.0),
            recent_outcomes: Vec::new(),
            distinct_contexts: BTreeSet::new(),
            consolidated_usage: 0,
            steps,
        }
    }

    /// Check the structural invariants.
    ///
    /// - confidence in [0, 1];
    /// - step ids unique;
    /// - every dependency references a step that precedes it in order
    ///   (which also makes the graph acyclic by construction);
    /// - every output reference is covered by a dependency edge.
    pub fn validate(&self) -> TraceResult<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(TraceError::TraceCorrupt(format!(
                "confidence {} out of [0,1]",
                self.confidence
            )));
        }

        let mut seen: BTreeSet<Uuid> = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.id) {
                return Err(TraceError::TraceCorrupt(format!(
                    "duplicate step id {}",
                    step.id
                )));
            }
        }

        let mut preceding: BTreeSet<Uuid> = BTreeSet::new();
        for step in &self.steps {
            for dep in &step.depends_on {
                if !preceding.contains(dep) {
                    return Err(TraceError::TraceCorrupt(format!(
                        "step {} depends on {} which does not precede it",
                        step.id, dep
                    )));
                }
            }
            for referenced in step.referenced_steps() {
                if !step.depends_on.contains(&referenced) {
                    return Err(TraceError::TraceCorrupt(format!(
                        "step {} references output of {} without a dependency edge",
                        step.id, referenced
                    )));
                }
            }
            preceding.insert(step.id);
        }

        Ok(())
    }

    /// Apply a replay outcome to the usage, success-rate, recency and
    /// confidence fields.
    ///
    /// Cancelled outcomes mutate nothing: cancellation is not evidence
    /// about the trace.
    pub fn apply_outcome(
        &mut self,
        outcome: Outcome,
        context: Option<&str>,
        params: &ConfidenceParams,
    ) {
        let succeeded = match outcome {
            Outcome::Success => true,
            Outcome::Failure => false,
            Outcome::Cancelled => return,
        };

        self.usage_count += 1;
        let n = self.usage_count as f64;
        let sample = if succeeded { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1.0) + sample) / n;

        self.recent_outcomes.push(succeeded);
        if self.recent_outcomes.len() > RECENT_WINDOW_CAP {
            let excess = self.recent_outcomes.len() - RECENT_WINDOW_CAP;
            self.recent_outcomes.drain(0..excess);
        }

        if succeeded {
            self.confidence += (1.0 - self.confidence) * params.gain_k / n.sqrt();
        } else {
            self.confidence *= params.decay_factor;
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);

        if let Some(ctx) = context {
            self.distinct_contexts.insert(ctx.to_string());
        }
        self.last_used = Utc::now();
    }

    /// Success rate over the most recent `window` replays, if at least
    /// that many outcomes have been recorded.
    pub fn recent_success_rate(&self, window: usize) -> Option<f64> {
        if window == 0 || self.recent_outcomes.len() < window {
            return None;
        }
        let tail = &self.recent_outcomes[self.recent_outcomes.len() - window..];
        let successes = tail.iter().filter(|s| **s).count();
        Some(successes as f64 / window as f64)
    }

    /// Age of the trace in whole days.
    pub fn age_days(&self) -> i64 {
        (Utc::now() - self.created_at).num_days()
    }

    /// Days since the last status change.
    pub fn days_in_status(&self) -> i64 {
        (Utc::now() - self.status_changed_at).num_days()
    }

    /// Number of distinct dispatch contexts that validated this trace.
    pub fn distinct_context_count(&self) -> usize {
        self.distinct_contexts.len()
    }

    /// Ranking score against a goal description:
    /// `similarity * (0.5 + 0.5 * confidence)`.
    pub fn match_score(&self, goal: &str) -> f64 {
        text_similarity(goal, &self.goal_signature) * (0.5 + 0.5 * self.confidence)
    }

    /// Compact stats view.
    pub fn stats(&self) -> TraceStats {
        TraceStats {
            confidence: self.confidence,
            tier: self.tier,
            usage_count: self.usage_count,
            success_rate: self.success_rate,
        }
    }

    /// Serialize to the persisted one-document-per-trace format.
    pub fn to_document(&self) -> TraceResult<String> {
        let doc = TraceDocument::from(self.clone());
        serde_json::to_string_pretty(&doc).map_err(Into::into)
    }

    /// Parse a persisted document back into a trace, enforcing the
    /// structural invariants. Both parse failures and invariant
    /// violations surface as [`TraceError::TraceCorrupt`].
    pub fn from_document(document: &str) -> TraceResult<Self> {
        let doc: TraceDocument = serde_json::from_str(document)
            .map_err(|e| TraceError::TraceCorrupt(e.to_string()))?;
        let trace = ExecutionTrace::from(doc);
        trace.validate()?;
        Ok(trace)
    }
}

/// Persisted representation: a metadata block followed by the ordered
/// step blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceDocument {
    /// Key/value metadata fields.
    pub metadata: TraceMetadata,
    /// Ordered step blocks.
    pub steps: Vec<Step>,
}

/// Metadata block of a persisted trace document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub trace_id: Uuid,
    pub goal_signature: String,
    pub confidence: f64,
    pub success_rate: f64,
    pub usage_count: u64,
    pub tier: TraceTier,
    pub status: TraceStatus,
    pub fundamental: bool,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    pub estimated_secs: f64,
    pub recent_outcomes: Vec<bool>,
    pub distinct_contexts: BTreeSet<String>,
    pub consolidated_usage: u64,
}

impl From<ExecutionTrace> for TraceDocument {
    fn from(trace: ExecutionTrace) -> Self {
        Self {
            metadata: TraceMetadata {
                trace_id: trace.id,
                goal_signature: trace.goal_signature,
                confidence: trace.confidence,
                success_rate: trace.success_rate,
                usage_count: trace.usage_count,
                tier: trace.tier,
                status: trace.status,
                fundamental: trace.fundamental,
                version: trace.version,
                created_at: trace.created_at,
                last_used: trace.last_used,
                status_changed_at: trace.status_changed_at,
                estimated_secs: trace.estimated_secs,
                recent_outcomes: trace.recent_outcomes,
                distinct_contexts: trace.distinct_contexts,
                consolidated_usage: trace.consolidated_usage,
            },
            steps: trace.steps,
        }
    }
}

impl From<TraceDocument> for ExecutionTrace {
    fn from(doc: TraceDocument) -> Self {
        let m = doc.metadata;
        Self {
            id: m.trace_id,
            goal_signature: m.goal_signature,
            confidence: m.confidence,
            success_rate: m.success_rate,
            usage_count: m.usage_count,
            tier: m.tier,
            status: m.status,
            fundamental: m.fundamental,
            created_at: m.created_at,
            last_used: m.last_used,
            status_changed_at: m.status_changed_at,
            version: m.version,
            estimated_secs: m.estimated_secs,
            recent_outcomes: m.recent_outcomes,
            distinct_contexts: m.distinct_contexts,
            consolidated_usage: m.consolidated_usage,
            steps: doc.steps,
        }
    }
}

/// A candidate trace scored against a goal description.
#[derive(Debug, Clone)]
pub struct ScoredTrace {
    /// The candidate.
    pub trace: ExecutionTrace,
    /// Raw textual similarity component, in [0, 1].
    pub similarity: f64,
    /// Final ranking score.
    pub score: f64,
}

/// Rank candidates against a goal description, highest score first.
///
/// Ties break toward higher `usage_count`, then lexically on id so the
/// ordering is fully deterministic for a fixed store snapshot.
pub fn rank_candidates(goal: &str, candidates: Vec<ExecutionTrace>) -> Vec<ScoredTrace> {
    let mut scored: Vec<ScoredTrace> = candidates
        .into_iter()
        .map(|trace| {
            let similarity = text_similarity(goal, &trace.goal_signature);
            let score = similarity * (0.5 + 0.5 * trace.confidence);
            ScoredTrace { trace, similarity, score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.trace.usage_count.cmp(&a.trace.usage_count))
            .then_with(|| a.trace.id.cmp(&b.trace.id))
    });
    scored
}

/// Lexical similarity between a goal description and a goal signature.
///
/// Combines Jaccard word overlap, a term-frequency-weighted overlap that
/// boosts rarer shared words, and bigram overlap for phrase matching.
/// Deterministic by construction, which keeps dispatch decisions
/// reproducible for a fixed store snapshot.
pub fn text_similarity(text_a: &str, text_b: &str) -> f64 {
    let lower_a = text_a.to_lowercase();
    let lower_b = text_b.to_lowercase();
    let words_a: Vec<&str> = lower_a.split_whitespace().collect();
    let words_b: Vec<&str> = lower_b.split_whitespace().collect();

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let set_a: BTreeSet<&str> = words_a.iter().copied().collect();
    let set_b: BTreeSet<&str> = words_b.iter().copied().collect();

    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    let jaccard = if union > 0.0 { intersection / union } else { 0.0 };

    // Weighted overlap: shared words that are rarer in the combined text
    // count for more; stop words are nearly discounted.
    const STOP_WORDS: &[&str] = &[
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "shall", "should", "may", "might", "must", "can",
        "could", "of", "in", "to", "for", "with", "on", "at", "from", "by", "and", "or", "but",
        "not", "this", "that", "it", "its", "as", "if", "then", "than", "so",
    ];

    let total_words = (words_a.len() + words_b.len()) as f64;
    let count_in = |words: &[&str], w: &str| words.iter().filter(|x| **x == w).count() as f64;

    let term_weight = |w: &str| {
        let combined = count_in(&words_a, w) + count_in(&words_b, w);
        let idf_proxy = (total_words / combined).ln().max(0.1);
        let stop_penalty = if STOP_WORDS.contains(&w) { 0.1 } else { 1.0 };
        idf_proxy * stop_penalty
    };

    let mut weighted_overlap = 0.0;
    let mut weight_sum = 0.0;
    for w in set_a.intersection(&set_b) {
        let weight = term_weight(w);
        weighted_overlap += weight;
        weight_sum += weight;
    }
    for w in set_a.symmetric_difference(&set_b) {
        weight_sum += term_weight(w);
    }
    let weighted = if weight_sum > 0.0 { weighted_overlap / weight_sum } else { 0.0 };

    // Bigram overlap for phrase-level similarity.
    let bigrams = |words: &[&str]| -> BTreeSet<String> {
        words.windows(2).map(|w| format!("{} {}", w[0], w[1])).collect()
    };
    let bigrams_a = bigrams(&words_a);
    let bigrams_b = bigrams(&words_b);
    let bigram_score = if bigrams_a.is_empty() && bigrams_b.is_empty() {
        jaccard
    } else {
        let bi_intersection = bigrams_a.intersection(&bigrams_b).count() as f64;
        let bi_union = bigrams_a.union(&bigrams_b).count() as f64;
        if bi_union > 0.0 { bi_intersection / bi_union } else { 0.0 }
    };

    (0.30 * jaccard + 0.50 * weighted + 0.20 * bigram_score).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::step::Step;

    fn two_step_trace() -> ExecutionTrace {
        let a = Step::new("fetch").with_literal("url", "https://example.com");
        let b = Step::new("parse").with_output_ref("input", a.id);
        ExecutionTrace::new("fetch and parse the report", vec![a, b], 0.6, 12.0)
    }

    #[test]
    fn test_new_trace_seeds_high_tier() {
        let trace = two_step_trace();
        assert_eq!(trace.tier, TraceTier::High);
        assert_eq!(trace.status, TraceStatus::Active);
        assert_eq!(trace.usage_count, 0);
        assert_eq!(trace.version, 1);
        assert!((trace.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_accepts_forward_edges() {
        assert!(two_step_trace().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_forward_reference() {
        let a = Step::new("fetch");
        let b = Step::new("parse").with_output_ref("input", a.id);
        // b placed before a: dependency points forward
        let trace = ExecutionTrace::new("goal", vec![b, a], 0.5, 5.0);
        assert!(matches!(trace.validate(), Err(TraceError::TraceCorrupt(_))));
    }

    #[test]
    fn test_validate_rejects_reference_without_edge() {
        let a = Step::new("fetch");
        let mut b = Step::new("parse").with_output_ref("input", a.id);
        b.depends_on.clear();
        let trace = ExecutionTrace::new("goal", vec![a, b], 0.5, 5.0);
        assert!(matches!(trace.validate(), Err(TraceError::TraceCorrupt(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range_confidence() {
        let mut trace = two_step_trace();
        trace.confidence = 1.5;
        assert!(trace.validate().is_err());
    }

    #[test]
    fn test_apply_outcome_success_raises_confidence() {
        let mut trace = two_step_trace();
        let params = ConfidenceParams::default();
        let before = trace.confidence;

        trace.apply_outcome(Outcome::Success, Some("ctx-1"), &params);

        assert_eq!(trace.usage_count, 1);
        assert!(trace.confidence > before);
        assert!((trace.success_rate - 1.0).abs() < 1e-9);
        assert_eq!(trace.distinct_context_count(), 1);
    }

    #[test]
    fn test_apply_outcome_failure_decays_confidence() {
        let mut trace = two_step_trace();
        let params = ConfidenceParams::default();
        trace.confidence = 0.8;

        trace.apply_outcome(Outcome::Failure, None, &params);

        assert_eq!(trace.usage_count, 1);
        assert!((trace.confidence - 0.8 * params.decay_factor).abs() < 1e-9);
        assert!((trace.success_rate - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancelled_outcome_mutates_nothing() {
        let mut trace = two_step_trace();
        let params = ConfidenceParams::default();
        let before = trace.clone();

        trace.apply_outcome(Outcome::Cancelled, Some("ctx"), &params);

        assert_eq!(trace.usage_count, before.usage_count);
        assert!((trace.confidence - before.confidence).abs() < f64::EPSILON);
        assert!(trace.recent_outcomes.is_empty());
        assert!(trace.distinct_contexts.is_empty());
    }

    #[test]
    fn test_confidence_stays_bounded_under_many_outcomes() {
        let mut trace = two_step_trace();
        let params = ConfidenceParams::default();

        for i in 0..500 {
            let outcome = if i % 3 == 0 { Outcome::Failure } else { Outcome::Success };
            trace.apply_outcome(outcome, None, &params);
            assert!((0.0..=1.0).contains(&trace.confidence));
        }
        assert_eq!(trace.usage_count, 500);
    }

    #[test]
    fn test_recent_success_rate_window() {
        let mut trace = two_step_trace();
        let params = ConfidenceParams::default();

        assert!(trace.recent_success_rate(5).is_none());

        for _ in 0..3 {
            trace.apply_outcome(Outcome::Success, None, &params);
        }
        for _ in 0..2 {
            trace.apply_outcome(Outcome::Failure, None, &params);
        }

        let rate = trace.recent_success_rate(5).unwrap();
        assert!((rate - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_recent_window_is_bounded() {
        let mut trace = two_step_trace();
        let params = ConfidenceParams::default();
        for _ in 0..(RECENT_WINDOW_CAP + 10) {
            trace.apply_outcome(Outcome::Success, None, &params);
        }
        assert_eq!(trace.recent_outcomes.len(), RECENT_WINDOW_CAP);
    }

    #[test]
    fn test_tier_adjacency() {
        assert!(TraceTier::High.is_adjacent(TraceTier::Mid));
        assert!(TraceTier::Mid.is_adjacent(TraceTier::Low));
        assert!(!TraceTier::High.is_adjacent(TraceTier::Low));
        assert_eq!(TraceTier::Low.next_consolidated(), Some(TraceTier::UltraLow));
        assert_eq!(TraceTier::UltraLow.next_consolidated(), None);
    }

    #[test]
    fn test_document_roundtrip() {
        let mut trace = two_step_trace();
        let params = ConfidenceParams::default();
        trace.apply_outcome(Outcome::Success, Some("ctx-a"), &params);
        trace.apply_outcome(Outcome::Failure, Some("ctx-b"), &params);

        let doc = trace.to_document().unwrap();
        let parsed = ExecutionTrace::from_document(&doc).unwrap();
        assert_eq!(parsed, trace);
    }

    #[test]
    fn test_from_document_rejects_garbage() {
        assert!(matches!(
            ExecutionTrace::from_document("not json at all"),
            Err(TraceError::TraceCorrupt(_))
        ));
    }

    #[test]
    fn test_from_document_rejects_invariant_violation() {
        let a = Step::new("fetch");
        let b = Step::new("parse").with_output_ref("input", a.id);
        let trace = ExecutionTrace::new("goal", vec![b, a], 0.5, 5.0);
        let doc = trace.to_document().unwrap();
        assert!(matches!(
            ExecutionTrace::from_document(&doc),
            Err(TraceError::TraceCorrupt(_))
        ));
    }

    #[test]
    fn test_text_similarity_basics() {
        assert!((text_similarity("deploy the service", "deploy the service") - 1.0).abs() < 1e-9);
        assert!(text_similarity("deploy the service", "bake a cake") < 0.1);
        let partial = text_similarity(
            "deploy the payments service to staging",
            "deploy the billing service to staging",
        );
        assert!(partial > 0.3 && partial < 1.0);
    }

    #[test]
    fn test_rank_candidates_prefers_similarity_and_confidence() {
        let mut close = ExecutionTrace::new("resize images in a folder", vec![], 0.9, 5.0);
        close.usage_count = 3;
        let far = ExecutionTrace::new("send the weekly report email", vec![], 0.9, 5.0);

        let ranked = rank_candidates("resize all images in the folder", vec![far, close.clone()]);
        assert_eq!(ranked[0].trace.id, close.id);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_rank_candidates_tie_breaks_on_usage() {
        let mut a = ExecutionTrace::new("sync the catalog", vec![], 0.8, 5.0);
        a.usage_count = 2;
        let mut b = ExecutionTrace::new("sync the catalog", vec![], 0.8, 5.0);
        b.usage_count = 50;

        let ranked = rank_candidates("sync the catalog", vec![a, b.clone()]);
        assert_eq!(ranked[0].trace.id, b.id);
    }
}

