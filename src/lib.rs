//! Engram - execution-memory core for agent orchestration.
//!
//! Engram turns one-off successful task executions into reusable,
//! replayable procedures ("traces"), decides per-goal whether to replay a
//! known procedure or delegate to a general-purpose reasoning engine, and
//! continuously promotes, demotes, and prunes procedures through a
//! reliability-tier hierarchy based on observed outcomes.
//!
//! # Architecture
//!
//! The crate follows Clean Architecture / Hexagonal principles:
//!
//! - **Domain Layer** (`domain`): models, invariants, and the ports to
//!   external collaborators (trace store, reasoning engine, tool layer)
//! - **Service Layer** (`services`): trace synthesis, consolidation, and
//!   replay execution
//! - **Application Layer** (`application`): the dispatcher use case
//! - **Adapters** (`adapters`): SQLite store, test doubles
//! - **Infrastructure** (`infrastructure`): configuration loading
//! - **CLI Layer** (`cli`): the operational command surface
//!
//! # Example
//!
//! ```ignore
//! use engram::application::Dispatcher;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Wire a repository, tool runner and reasoning engine, then:
//!     // dispatcher.dispatch("resize the images", None).await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{DispatchError, DispatchMode, DispatchReport, DispatchResult, Dispatcher};
pub use domain::errors::{TraceError, TraceResult};
pub use domain::models::{
    Config, ErrorPolicy, ExecutionTrace, Outcome, RunLog, Step, StepStatus, TraceStats,
    TraceStatus, TraceTier,
};
pub use domain::ports::{ReasoningEngine, ReasoningRun, ToolOutcome, ToolRunner, TraceRepository};
pub use infrastructure::{ConfigError, ConfigLoader};
pub use services::{
    ConsolidationDaemon, ConsolidationEngine, ReplayExecutor, ReplayReport, ReplayStatus,
    TraceSynthesizer,
};
