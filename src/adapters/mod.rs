//! Adapters: concrete implementations of the domain ports.

pub mod mock;
pub mod sqlite;

pub use mock::{MockReasoningEngine, MockToolRunner};
pub use sqlite::SqliteTraceRepository;
