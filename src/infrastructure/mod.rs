//! Infrastructure layer: configuration and process-level wiring.

pub mod config;

pub use config::{ConfigError, ConfigLoader};
