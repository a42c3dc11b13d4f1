//! Service layer: trace synthesis, consolidation, and replay execution.

pub mod consolidation;
pub mod consolidation_daemon;
pub mod replay_executor;
pub mod synthesizer;

pub use consolidation::{ConsolidationEngine, ConsolidationReport, TransitionRecord};
pub use consolidation_daemon::{
    ConsolidationDaemon, DaemonConfig, DaemonEvent, DaemonHandle, DaemonStatus, StopReason,
};
pub use replay_executor::{ReplayExecutor, ReplayReport, ReplayStatus, StepReport};
pub use synthesizer::{SynthesizerConfig, TraceSynthesizer};
