//! SQLite implementation of the TraceRepository.
//!
//! Each trace is stored as one canonical JSON document; frequently
//! queried fields are mirrored into real columns. All mutation goes
//! through an optimistic compare-and-swap on the row's `rev` column, so
//! concurrent replays of the same trace never lose an update.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{TraceError, TraceResult};
use crate::domain::models::{
    ConfidenceParams, ExecutionTrace, Outcome, TraceStatus, TraceTier,
};
use crate::domain::ports::TraceRepository;

/// Maximum CAS attempts before reporting a transition conflict.
const CAS_MAX_ATTEMPTS: u32 = 16;
/// Pause between CAS attempts.
const CAS_RETRY_DELAY: Duration = Duration::from_millis(5);

#[derive(Clone)]
pub struct SqliteTraceRepository {
    pool: SqlitePool,
}

impl SqliteTraceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_row(&self, id: Uuid) -> TraceResult<Option<TraceRow>> {
        let row: Option<TraceRow> = sqlx::query_as("SELECT * FROM traces WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Mark a row corrupt without touching its document, so the damaged
    /// payload stays available for manual review.
    async fn quarantine(&self, id: Uuid, reason: &str) -> TraceResult<()> {
        tracing::warn!(trace_id = %id, reason, "quarantining corrupt trace document");
        sqlx::query(
            "UPDATE traces SET status = ?, status_changed_at = ?, rev = rev + 1 WHERE id = ?",
        )
        .bind(TraceStatus::Corrupt.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn parse_row(row: &TraceRow) -> TraceResult<ExecutionTrace> {
        if row.status == TraceStatus::Corrupt.as_str() {
            return Err(TraceError::TraceCorrupt(format!(
                "trace {} is quarantined",
                row.id
            )));
        }
        ExecutionTrace::from_document(&row.document)
    }

    /// Write back a mutated trace, guarded by the revision the row held
    /// when it was read. Returns false on a lost race.
    async fn cas_write(&self, trace: &ExecutionTrace, expected_rev: i64) -> TraceResult<bool> {
        let document = trace.to_document()?;
        let result = sqlx::query(
            r#"UPDATE traces SET
                   goal_signature = ?, confidence = ?, success_rate = ?, usage_count = ?,
                   tier = ?, status = ?, fundamental = ?, version = ?, estimated_secs = ?,
                   consolidated_usage = ?, document = ?, last_used = ?, status_changed_at = ?,
                   rev = rev + 1
               WHERE id = ? AND rev = ?"#,
        )
        .bind(&trace.goal_signature)
        .bind(trace.confidence)
        .bind(trace.success_rate)
        .bind(trace.usage_count as i64)
        .bind(trace.tier.as_str())
        .bind(trace.status.as_str())
        .bind(i64::from(trace.fundamental))
        .bind(i64::from(trace.version))
        .bind(trace.estimated_secs)
        .bind(trace.consolidated_usage as i64)
        .bind(&document)
        .bind(trace.last_used.to_rfc3339())
        .bind(trace.status_changed_at.to_rfc3339())
        .bind(trace.id.to_string())
        .bind(expected_rev)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Read-modify-write loop. `mutate` returns false to abort without
    /// writing; the returned flag reports whether a write happened.
    async fn cas_mutate<F>(&self, id: Uuid, mutate: F) -> TraceResult<(ExecutionTrace, bool)>
    where
        F: Fn(&mut ExecutionTrace) -> bool,
    {
        for _ in 0..CAS_MAX_ATTEMPTS {
            let row = self.load_row(id).await?.ok_or(TraceError::TraceNotFound(id))?;
            let mut trace = match Self::parse_row(&row) {
                Ok(t) => t,
                Err(TraceError::TraceCorrupt(reason)) => {
                    if row.status != TraceStatus::Corrupt.as_str() {
                        self.quarantine(id, &reason).await?;
                    }
                    return Err(TraceError::TraceCorrupt(reason));
                }
                Err(e) => return Err(e),
            };

            if !mutate(&mut trace) {
                return Ok((trace, false));
            }
            if self.cas_write(&trace, row.rev).await? {
                return Ok((trace, true));
            }
            tokio::time::sleep(CAS_RETRY_DELAY).await;
        }
        Err(TraceError::TierTransitionConflict(id))
    }

    async fn insert(&self, trace: &ExecutionTrace) -> TraceResult<()> {
        let document = trace.to_document()?;
        sqlx::query(
            r#"INSERT INTO traces
                   (id, goal_signature, confidence, success_rate, usage_count, tier, status,
                    fundamental, version, estimated_secs, consolidated_usage, document,
                    created_at, last_used, status_changed_at, rev)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"#,
        )
        .bind(trace.id.to_string())
        .bind(&trace.goal_signature)
        .bind(trace.confidence)
        .bind(trace.success_rate)
        .bind(trace.usage_count as i64)
        .bind(trace.tier.as_str())
        .bind(trace.status.as_str())
        .bind(i64::from(trace.fundamental))
        .bind(i64::from(trace.version))
        .bind(trace.estimated_secs)
        .bind(trace.consolidated_usage as i64)
        .bind(&document)
        .bind(trace.created_at.to_rfc3339())
        .bind(trace.last_used.to_rfc3339())
        .bind(trace.status_changed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_where_status(&self, status: TraceStatus) -> TraceResult<Vec<TraceRow>> {
        let rows: Vec<TraceRow> =
            sqlx::query_as("SELECT * FROM traces WHERE status = ? ORDER BY last_used DESC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}

#[async_trait]
impl TraceRepository for SqliteTraceRepository {
    async fn put(&self, trace: &ExecutionTrace) -> TraceResult<ExecutionTrace> {
        trace.validate()?;

        // Supersede any active trace for the same goal signature; the new
        // trace continues that signature's version sequence.
        let prior: Vec<(String, i64)> = sqlx::query_as(
            "SELECT id, version FROM traces WHERE goal_signature = ? AND status = ?",
        )
        .bind(&trace.goal_signature)
        .bind(TraceStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await?;

        let max_version: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT MAX(version) FROM traces WHERE goal_signature = ?")
                .bind(&trace.goal_signature)
                .fetch_optional(&self.pool)
                .await?;
        let next_version = max_version
            .and_then(|(v,)| v)
            .map(|v| v as u32 + 1)
            .unwrap_or(1);

        for (prior_id, _) in &prior {
            let prior_id = super::parse_uuid(prior_id)?;
            let superseded = self
                .cas_mutate(prior_id, |t| {
                    if t.status == TraceStatus::Active {
                        t.status = TraceStatus::Superseded;
                        t.status_changed_at = Utc::now();
                        true
                    } else {
                        false
                    }
                })
                .await;
            match superseded {
                Ok(_) => {}
                // A corrupt prior is already quarantined out of
                // circulation; the new version may still land.
                Err(TraceError::TraceCorrupt(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let mut stored = trace.clone();
        stored.version = next_version;
        self.insert(&stored).await?;
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> TraceResult<Option<ExecutionTrace>> {
        let Some(row) = self.load_row(id).await? else {
            return Ok(None);
        };
        match Self::parse_row(&row) {
            Ok(trace) => Ok(Some(trace)),
            Err(TraceError::TraceCorrupt(reason)) => {
                if row.status != TraceStatus::Corrupt.as_str() {
                    self.quarantine(id, &reason).await?;
                }
                Err(TraceError::TraceCorrupt(reason))
            }
            Err(e) => Err(e),
        }
    }

    async fn candidates(&self) -> TraceResult<Vec<ExecutionTrace>> {
        let rows = self.list_where_status(TraceStatus::Active).await?;
        let mut traces = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::parse_row(&row) {
                Ok(trace) => traces.push(trace),
                Err(TraceError::TraceCorrupt(reason)) => {
                    // Excluded from search, kept for manual review.
                    let id = super::parse_uuid(&row.id)?;
                    self.quarantine(id, &reason).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(traces)
    }

    async fn update_stats(
        &self,
        id: Uuid,
        outcome: Outcome,
        context: Option<&str>,
        params: &ConfidenceParams,
    ) -> TraceResult<ExecutionTrace> {
        let (trace, _) = self
            .cas_mutate(id, |trace| {
                if outcome == Outcome::Cancelled {
                    return false;
                }
                trace.apply_outcome(outcome, context, params);
                true
            })
            .await?;
        Ok(trace)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: (TraceTier, TraceStatus),
        to: (TraceTier, TraceStatus),
    ) -> TraceResult<bool> {
        let (_, applied) = self
            .cas_mutate(id, |trace| {
                if (trace.tier, trace.status) != from || from == to {
                    return false;
                }
                trace.tier = to.0;
                trace.status = to.1;
                trace.status_changed_at = Utc::now();
                true
            })
            .await?;
        Ok(applied)
    }

    async fn set_consolidated_usage(&self, id: Uuid, usage: u64) -> TraceResult<()> {
        self.cas_mutate(id, |trace| {
            if trace.consolidated_usage == usage {
                return false;
            }
            trace.consolidated_usage = usage;
            true
        })
        .await?;
        Ok(())
    }

    async fn set_fundamental(&self, id: Uuid, fundamental: bool) -> TraceResult<()> {
        self.cas_mutate(id, |trace| {
            if trace.fundamental == fundamental {
                return false;
            }
            trace.fundamental = fundamental;
            true
        })
        .await?;
        Ok(())
    }

    async fn list_by_status(&self, status: TraceStatus) -> TraceResult<Vec<ExecutionTrace>> {
        let rows = self.list_where_status(status).await?;
        let mut traces = Vec::with_capacity(rows.len());
        for row in rows {
            if status == TraceStatus::Corrupt {
                // Quarantined documents may not parse; list what the
                // mirror columns still know so review tooling can see them.
                match ExecutionTrace::from_document(&row.document) {
                    Ok(mut trace) => {
                        trace.status = TraceStatus::Corrupt;
                        traces.push(trace);
                    }
                    Err(_) => traces.push(row.to_skeleton()?),
                }
            } else {
                traces.push(Self::parse_row(&row)?);
            }
        }
        Ok(traces)
    }

    async fn list_by_tier(&self, tier: TraceTier) -> TraceResult<Vec<ExecutionTrace>> {
        let rows: Vec<TraceRow> =
            sqlx::query_as("SELECT * FROM traces WHERE tier = ? AND status != ? ORDER BY last_used DESC")
                .bind(tier.as_str())
                .bind(TraceStatus::Corrupt.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn delete(&self, id: Uuid) -> TraceResult<()> {
        let result = sqlx::query("DELETE FROM traces WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TraceError::TraceNotFound(id));
        }
        Ok(())
    }

    async fn count_by_tier(&self) -> TraceResult<HashMap<TraceTier, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT tier, COUNT(*) FROM traces GROUP BY tier")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = HashMap::new();
        for (tier_str, count) in rows {
            if let Some(tier) = TraceTier::from_str(&tier_str) {
                counts.insert(tier, count as u64);
            }
        }
        Ok(counts)
    }
}

#[derive(sqlx::FromRow)]
struct TraceRow {
    id: String,
    goal_signature: String,
    confidence: f64,
    success_rate: f64,
    usage_count: i64,
    tier: String,
    status: String,
    fundamental: i64,
    version: i64,
    estimated_secs: f64,
    consolidated_usage: i64,
    document: String,
    created_at: String,
    last_used: String,
    status_changed_at: String,
    rev: i64,
}

impl TraceRow {
    /// Minimal trace reconstructed from mirror columns when the document
    /// itself is damaged. Used only for review listings.
    fn to_skeleton(&self) -> TraceResult<ExecutionTrace> {
        Ok(ExecutionTrace {
            id: super::parse_uuid(&self.id)?,
            goal_signature: self.goal_signature.clone(),
            confidence: self.confidence,
            success_rate: self.success_rate,
            usage_count: self.usage_count as u64,
            tier: TraceTier::from_str(&self.tier).unwrap_or_default(),
            status: TraceStatus::Corrupt,
            fundamental: self.fundamental != 0,
            created_at: super::parse_datetime(&self.created_at)?,
            last_used: super::parse_datetime(&self.last_used)?,
            status_changed_at: super::parse_datetime(&self.status_changed_at)?,
            version: self.version as u32,
            estimated_secs: self.estimated_secs,
            recent_outcomes: Vec::new(),
            distinct_contexts: std::collections::BTreeSet::new(),
            consolidated_usage: self.consolidated_usage as u64,
            steps: Vec::new(),
        })
    }
}
