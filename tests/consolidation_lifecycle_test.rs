//! End-to-end lifecycle tests: a trace climbing the full consolidation
//! ladder, and archival reachability from every tier.

use std::sync::Arc;

use chrono::{Duration, Utc};
use engram::adapters::sqlite::{create_migrated_test_pool, SqliteTraceRepository};
use engram::domain::models::{
    ConfidenceParams, ConsolidationConfig, ExecutionTrace, Outcome, Step, TraceStatus, TraceTier,
};
use engram::domain::ports::TraceRepository;
use engram::services::ConsolidationEngine;

async fn setup() -> (Arc<SqliteTraceRepository>, ConsolidationEngine<SqliteTraceRepository>) {
    let pool = create_migrated_test_pool().await.unwrap();
    let repo = Arc::new(SqliteTraceRepository::new(pool));
    let engine = ConsolidationEngine::new(repo.clone(), ConsolidationConfig::default());
    (repo, engine)
}

fn trace(goal: &str) -> ExecutionTrace {
    ExecutionTrace::new(goal, vec![Step::new("tool")], 0.75, 5.0)
}

async fn record_successes(
    repo: &Arc<SqliteTraceRepository>,
    id: uuid::Uuid,
    count: usize,
    contexts: usize,
) {
    let params = ConfidenceParams::default();
    for i in 0..count {
        let ctx = format!("ctx-{}", i % contexts.max(1));
        repo.update_stats(id, Outcome::Success, Some(&ctx), &params)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn full_promotion_ladder_one_tier_per_pass() {
    let (repo, engine) = setup().await;
    let stored = repo.put(&trace("deploy the billing service")).await.unwrap();

    // One clean replay lifts confidence past the mid gate.
    record_successes(&repo, stored.id, 1, 1).await;
    engine.run_pass().await.unwrap();
    let t = repo.get(stored.id).await.unwrap().unwrap();
    assert_eq!(t.tier, TraceTier::Mid);

    // Twenty-five more successes across four contexts clear the low gates.
    record_successes(&repo, stored.id, 25, 4).await;
    engine.run_pass().await.unwrap();
    let t = repo.get(stored.id).await.unwrap().unwrap();
    assert_eq!(t.tier, TraceTier::Low);
    assert!(t.confidence >= 0.95, "confidence was {}", t.confidence);

    // Another eighty push usage and confidence past the ultra gates, but
    // promotion still requires the explicit approval signal.
    record_successes(&repo, stored.id, 80, 4).await;
    engine.run_pass().await.unwrap();
    let t = repo.get(stored.id).await.unwrap().unwrap();
    assert_eq!(t.tier, TraceTier::Low, "no automatic ultra-low promotion");
    assert!(t.usage_count >= 100);
    assert!(t.confidence >= 0.99, "confidence was {}", t.confidence);

    engine.approve_fundamental(stored.id).await.unwrap();
    engine.run_pass().await.unwrap();
    let t = repo.get(stored.id).await.unwrap().unwrap();
    assert_eq!(t.tier, TraceTier::UltraLow);

    // And the ladder never skipped a tier: final sanity via adjacency of
    // the recorded history is covered by unit tests; here the end state
    // plus one-transition-per-pass structure already guarantees it.
}

#[tokio::test]
async fn archival_reachable_from_high_tier() {
    let (repo, engine) = setup().await;
    let mut t = trace("never used again");
    t.created_at = Utc::now() - Duration::days(35);
    let stored = repo.put(&t).await.unwrap();

    engine.run_pass().await.unwrap();
    let after = repo.get(stored.id).await.unwrap().unwrap();
    assert_eq!(after.status, TraceStatus::Archived);
}

#[tokio::test]
async fn archival_reachable_from_mid_tier_via_candidate() {
    let (repo, engine) = setup().await;
    let mut t = trace("went sour");
    t.tier = TraceTier::Mid;
    t.usage_count = 30;
    t.success_rate = 0.9;
    t.recent_outcomes = vec![false, false, false, true, false];
    let stored = repo.put(&t).await.unwrap();

    // Pass one: recent collapse marks it a candidate.
    engine.run_pass().await.unwrap();
    let after = repo.get(stored.id).await.unwrap().unwrap();
    assert_eq!(after.status, TraceStatus::ArchivedCandidate);

    // Back-date the status change so the candidate ages out.
    let mut aged = after.clone();
    aged.status_changed_at = Utc::now() - Duration::days(15);
    let doc = aged.to_document().unwrap();
    sqlx::query("UPDATE traces SET document = ?, status_changed_at = ? WHERE id = ?")
        .bind(doc)
        .bind(aged.status_changed_at.to_rfc3339())
        .bind(stored.id.to_string())
        .execute(repo.pool())
        .await
        .unwrap();

    engine.run_pass().await.unwrap();
    let after = repo.get(stored.id).await.unwrap().unwrap();
    assert_eq!(after.status, TraceStatus::Archived);
    assert_eq!(after.tier, TraceTier::Mid);
}

#[tokio::test]
async fn flagged_low_trace_archives_through_operator_review() {
    let (repo, engine) = setup().await;
    let mut t = trace("needs review");
    t.tier = TraceTier::Low;
    t.usage_count = 40;
    t.consolidated_usage = 30;
    t.success_rate = 0.8;
    t.recent_outcomes = vec![true; 10];
    let stored = repo.put(&t).await.unwrap();

    engine.run_pass().await.unwrap();
    let after = repo.get(stored.id).await.unwrap().unwrap();
    assert_eq!(after.status, TraceStatus::FlaggedForReview);

    // Manual review decides to archive; the trace leaves circulation but
    // the row survives.
    let moved = repo
        .transition(
            stored.id,
            (TraceTier::Low, TraceStatus::FlaggedForReview),
            (TraceTier::Low, TraceStatus::Archived),
        )
        .await
        .unwrap();
    assert!(moved);

    let after = repo.get(stored.id).await.unwrap().unwrap();
    assert_eq!(after.status, TraceStatus::Archived);
    assert!(repo.candidates().await.unwrap().is_empty());
}

#[tokio::test]
async fn repeated_passes_without_outcomes_are_stable() {
    let (repo, engine) = setup().await;
    let mut t = trace("steady state");
    t.tier = TraceTier::Mid;
    t.usage_count = 10;
    t.success_rate = 0.9;
    t.recent_outcomes = vec![true; 10];
    repo.put(&t).await.unwrap();

    let first = engine.run_pass().await.unwrap();
    assert!(first.is_noop());

    for _ in 0..3 {
        let pass = engine.run_pass().await.unwrap();
        assert!(pass.is_noop(), "repeated pass produced transitions");
    }
}
