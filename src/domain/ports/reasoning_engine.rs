//! Port for the external reasoning engine.
//!
//! The engine that solves novel goals is an external collaborator; the
//! core only consumes its finished run log after termination.

use async_trait::async_trait;

use crate::domain::errors::{TraceError, TraceResult};
use crate::domain::models::RunLog;

/// A terminated reasoning run: final outcome plus the ordered action log.
#[derive(Debug, Clone)]
pub struct ReasoningRun {
    /// Whether the engine reported overall success.
    pub success: bool,
    /// The ordered record of actions the engine took.
    pub log: RunLog,
}

/// External reasoning engine interface.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Execute a novel goal to termination and return the finished log.
    async fn execute_goal(&self, goal: &str) -> TraceResult<ReasoningRun>;
}

/// Engine stub for deployments where no reasoning engine is wired in
/// (e.g. the standalone CLI). Every goal surfaces as unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReasoningEngine;

#[async_trait]
impl ReasoningEngine for NullReasoningEngine {
    async fn execute_goal(&self, _goal: &str) -> TraceResult<ReasoningRun> {
        Err(TraceError::EngineUnavailable(
            "no reasoning engine configured".to_string(),
        ))
    }
}
