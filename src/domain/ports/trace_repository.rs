//! Repository port for trace storage.

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::TraceResult;
use crate::domain::models::{ConfidenceParams, ExecutionTrace, Outcome, TraceStatus, TraceTier};

/// Repository trait for the trace store and index.
///
/// Implementations must guarantee:
/// - at most one `Active` trace per goal signature (older versions are
///   marked `Superseded` but remain retrievable by id);
/// - `update_stats` is atomic per trace id; concurrent replays of the
///   same trace never lose an update;
/// - a persisted document that fails to parse is quarantined as
///   `Corrupt`, excluded from candidates, and never silently deleted.
#[async_trait]
pub trait TraceRepository: Send + Sync {
    /// Store a new trace, superseding any active trace with the same goal
    /// signature. Returns the stored trace with its assigned version.
    async fn put(&self, trace: &ExecutionTrace) -> TraceResult<ExecutionTrace>;

    /// Fetch a trace by id. A quarantined document surfaces as
    /// `TraceError::TraceCorrupt`.
    async fn get(&self, id: Uuid) -> TraceResult<Option<ExecutionTrace>>;

    /// All traces eligible for search (status `Active`). Ranking happens
    /// in the domain layer.
    async fn candidates(&self) -> TraceResult<Vec<ExecutionTrace>>;

    /// Atomically apply a replay outcome to a trace's stats. Returns the
    /// updated trace. Exhausted CAS retries surface as
    /// `TraceError::TierTransitionConflict`.
    async fn update_stats(
        &self,
        id: Uuid,
        outcome: Outcome,
        context: Option<&str>,
        params: &ConfidenceParams,
    ) -> TraceResult<ExecutionTrace>;

    /// Conditionally move a trace from one (tier, status) pair to another.
    /// Returns false when the trace was not in the expected state, which
    /// makes concurrent consolidation passes race-safe and idempotent.
    async fn transition(
        &self,
        id: Uuid,
        from: (TraceTier, TraceStatus),
        to: (TraceTier, TraceStatus),
    ) -> TraceResult<bool>;

    /// Record the usage watermark observed by a consolidation pass.
    async fn set_consolidated_usage(&self, id: Uuid, usage: u64) -> TraceResult<()>;

    /// Set or clear the explicit fundamental-approval flag.
    async fn set_fundamental(&self, id: Uuid, fundamental: bool) -> TraceResult<()>;

    /// List traces by lifecycle status.
    async fn list_by_status(&self, status: TraceStatus) -> TraceResult<Vec<ExecutionTrace>>;

    /// List traces by tier.
    async fn list_by_tier(&self, tier: TraceTier) -> TraceResult<Vec<ExecutionTrace>>;

    /// Permanently delete a trace. Only the consolidation engine calls
    /// this, after the archival aging period.
    async fn delete(&self, id: Uuid) -> TraceResult<()>;

    /// Count traces per tier.
    async fn count_by_tier(&self) -> TraceResult<HashMap<TraceTier, u64>>;
}
