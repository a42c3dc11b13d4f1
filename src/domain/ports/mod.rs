//! Ports: interfaces the core consumes or exposes at its seams.

pub mod reasoning_engine;
pub mod tool_runner;
pub mod trace_repository;

pub use reasoning_engine::{NullReasoningEngine, ReasoningEngine, ReasoningRun};
pub use tool_runner::{NullToolRunner, ToolOutcome, ToolRunner};
pub use trace_repository::TraceRepository;
