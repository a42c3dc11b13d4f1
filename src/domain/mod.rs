//! Domain layer: pure models, errors, and the ports consumed by the
//! service and application layers.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{TraceError, TraceResult};
