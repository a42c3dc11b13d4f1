//! Domain models for the engram execution-memory core.

pub mod config;
pub mod run_log;
pub mod step;
pub mod trace;

pub use config::{
    Config, ConsolidationConfig, DatabaseConfig, DispatchConfig, LoggingConfig, ReplayConfig,
};
pub use run_log::{ActionRecord, RunLog};
pub use step::{
    is_unavailable, unavailable_sentinel, BindingTable, ErrorPolicy, ParamValue, Step, StepStatus,
    ValidationCheck, UNAVAILABLE,
};
pub use trace::{
    rank_candidates, text_similarity, ConfidenceParams, ExecutionTrace, Outcome, ScoredTrace,
    TraceDocument, TraceMetadata, TraceStats, TraceStatus, TraceTier, RECENT_WINDOW_CAP,
};
