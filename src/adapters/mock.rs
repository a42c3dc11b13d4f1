//! Scriptable doubles for the external collaborators.
//!
//! Used by unit and integration tests to drive the replay executor and
//! dispatcher without a real tool layer or reasoning engine.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::errors::{TraceError, TraceResult};
use crate::domain::ports::{ReasoningEngine, ReasoningRun, ToolOutcome, ToolRunner};

/// One recorded invocation, for asserting ordering and arguments.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub tool_name: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// Scriptable tool runner.
///
/// Responses are queued per tool name; when a tool's queue is empty the
/// runner echoes the parameters back as a successful result. An optional
/// per-invocation delay simulates slow I/O-bound tools.
#[derive(Default)]
pub struct MockToolRunner {
    scripts: Mutex<HashMap<String, VecDeque<ToolOutcome>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl MockToolRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a runner that sleeps before answering each invocation.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay: Some(delay), ..Self::default() })
    }

    /// Queue the next responses for a tool, consumed in order.
    pub async fn script(&self, tool_name: &str, responses: Vec<ToolOutcome>) {
        let mut scripts = self.scripts.lock().await;
        scripts.entry(tool_name.to_string()).or_default().extend(responses);
    }

    /// All invocations recorded so far, in call order.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    /// Position of the first invocation of a tool in the call sequence.
    pub async fn call_position(&self, tool_name: &str) -> Option<usize> {
        self.calls
            .lock()
            .await
            .iter()
            .position(|c| c.tool_name == tool_name)
    }

    /// Number of invocations of a tool.
    pub async fn call_count(&self, tool_name: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.tool_name == tool_name)
            .count()
    }
}

#[async_trait]
impl ToolRunner for MockToolRunner {
    async fn invoke(
        &self,
        tool_name: &str,
        parameters: &BTreeMap<String, serde_json::Value>,
    ) -> TraceResult<ToolOutcome> {
        self.calls.lock().await.push(RecordedCall {
            tool_name: tool_name.to_string(),
            parameters: parameters.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = {
            let mut scripts = self.scripts.lock().await;
            scripts.get_mut(tool_name).and_then(VecDeque::pop_front)
        };

        Ok(scripted.unwrap_or_else(|| {
            ToolOutcome::ok(serde_json::json!({
                "tool": tool_name,
                "echo": parameters,
            }))
        }))
    }
}

/// Scriptable reasoning engine returning a fixed run per goal, with a
/// fallback run for unscripted goals.
#[derive(Default)]
pub struct MockReasoningEngine {
    runs: Mutex<HashMap<String, ReasoningRun>>,
    fallback: Mutex<Option<ReasoningRun>>,
    call_count: Mutex<u32>,
}

impl MockReasoningEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the run returned for a specific goal.
    pub async fn script_goal(&self, goal: &str, run: ReasoningRun) {
        self.runs.lock().await.insert(goal.to_string(), run);
    }

    /// Script the run returned for any unscripted goal.
    pub async fn script_fallback(&self, run: ReasoningRun) {
        *self.fallback.lock().await = Some(run);
    }

    /// Number of goals delegated so far.
    pub async fn calls(&self) -> u32 {
        *self.call_count.lock().await
    }
}

#[async_trait]
impl ReasoningEngine for MockReasoningEngine {
    async fn execute_goal(&self, goal: &str) -> TraceResult<ReasoningRun> {
        *self.call_count.lock().await += 1;

        if let Some(run) = self.runs.lock().await.get(goal) {
            return Ok(run.clone());
        }
        if let Some(run) = self.fallback.lock().await.clone() {
            return Ok(run);
        }
        Err(TraceError::EngineUnavailable(format!(
            "no scripted run for goal '{goal}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_consumed_in_order() {
        let runner = MockToolRunner::new();
        runner
            .script("flaky", vec![ToolOutcome::err("first"), ToolOutcome::ok(serde_json::json!(2))])
            .await;

        let first = runner.invoke("flaky", &BTreeMap::new()).await.unwrap();
        assert!(!first.success);
        let second = runner.invoke("flaky", &BTreeMap::new()).await.unwrap();
        assert!(second.success);

        assert_eq!(runner.call_count("flaky").await, 2);
    }

    #[tokio::test]
    async fn test_unscripted_tool_echoes() {
        let runner = MockToolRunner::new();
        let mut params = BTreeMap::new();
        params.insert("key".to_string(), serde_json::json!("value"));

        let outcome = runner.invoke("anything", &params).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.result["echo"]["key"], serde_json::json!("value"));
    }

    #[tokio::test]
    async fn test_mock_engine_requires_script() {
        let engine = MockReasoningEngine::new();
        assert!(engine.execute_goal("unknown").await.is_err());
        assert_eq!(engine.calls().await, 1);
    }
}
