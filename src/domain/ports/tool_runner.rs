//! Port for the external tool-execution layer.
//!
//! Steps are opaque calls through this interface; tool semantics are not
//! part of the core.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::domain::errors::{TraceError, TraceResult};

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// The tool's result value.
    pub result: serde_json::Value,
    /// Whether the tool reported success.
    pub success: bool,
    /// Tool-reported error message, if any.
    pub error: Option<String>,
}

impl ToolOutcome {
    /// A successful outcome carrying a result value.
    pub fn ok(result: serde_json::Value) -> Self {
        Self { result, success: true, error: None }
    }

    /// A failed outcome with an error message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: serde_json::Value::Null,
            success: false,
            error: Some(message.into()),
        }
    }
}

/// External tool abstraction.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Invoke a tool with resolved parameters.
    async fn invoke(
        &self,
        tool_name: &str,
        parameters: &BTreeMap<String, serde_json::Value>,
    ) -> TraceResult<ToolOutcome>;
}

/// Tool runner stub for deployments where no tool layer is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullToolRunner;

#[async_trait]
impl ToolRunner for NullToolRunner {
    async fn invoke(
        &self,
        tool_name: &str,
        _parameters: &BTreeMap<String, serde_json::Value>,
    ) -> TraceResult<ToolOutcome> {
        Err(TraceError::ToolInvocation {
            tool: tool_name.to_string(),
            message: "no tool runner configured".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_runner_fails_every_invocation() {
        let runner = NullToolRunner;
        let err = runner.invoke("anything", &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, TraceError::ToolInvocation { .. }));
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = ToolOutcome::ok(serde_json::json!(42));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = ToolOutcome::err("boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
