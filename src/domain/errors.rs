//! Domain errors for the engram execution-memory core.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur across the trace lifecycle.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Validation failed for step {step}: {check}")]
    ValidationFailure { step: Uuid, check: String },

    #[error("Tool invocation failed for '{tool}': {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("Step {step} references missing output of step {missing}")]
    DependencyUnresolved { step: Uuid, missing: Uuid },

    #[error("Concurrent stats/tier update conflict on trace {0}")]
    TierTransitionConflict(Uuid),

    #[error("Corrupt trace document: {0}")]
    TraceCorrupt(String),

    #[error("Trace not found: {0}")]
    TraceNotFound(Uuid),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Reasoning engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type TraceResult<T> = Result<T, TraceError>;

impl From<sqlx::Error> for TraceError {
    fn from(err: sqlx::Error) -> Self {
        TraceError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for TraceError {
    fn from(err: serde_json::Error) -> Self {
        TraceError::Serialization(err.to_string())
    }
}
