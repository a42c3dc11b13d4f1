//! Step domain model.
//!
//! Steps are the nodes of a trace's execution DAG. A step's parameters may
//! reference the output of an earlier step through a typed placeholder;
//! dependency edges are derived from those references plus explicit
//! `depends_on` entries.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use crate::domain::errors::{TraceError, TraceResult};

/// Sentinel value substituted for the output of a skipped step.
pub const UNAVAILABLE: &str = "__unavailable__";

/// Build the sentinel JSON value handed to steps that reference a skipped
/// step's output.
pub fn unavailable_sentinel() -> serde_json::Value {
    serde_json::Value::String(UNAVAILABLE.to_string())
}

/// Check whether a resolved parameter value is the unavailable sentinel.
pub fn is_unavailable(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::String(s) if s == UNAVAILABLE)
}

/// A step parameter value: either a literal, or a typed reference to the
/// output of an earlier step.
///
/// References are resolved through a [`BindingTable`] built while walking
/// the DAG, never by string substitution at call sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    /// A literal JSON value passed through unchanged.
    Literal(serde_json::Value),
    /// The output of the referenced step.
    OutputOf(Uuid),
}

impl ParamValue {
    /// Convenience constructor for literal parameters.
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    /// The referenced step id, if this is an output reference.
    pub fn referenced_step(&self) -> Option<Uuid> {
        match self {
            Self::Literal(_) => None,
            Self::OutputOf(id) => Some(*id),
        }
    }
}

/// A declarative check run against a step's tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ValidationCheck {
    /// The tool invocation itself must report success.
    ToolSucceeded,
    /// The result must not be null or an empty string/array/object.
    ResultNonEmpty,
    /// The result, rendered as text, must contain the needle.
    ResultContains {
        /// Substring that must appear in the result.
        needle: String,
    },
    /// The result must equal the expected value exactly.
    ResultEquals {
        /// Expected result value.
        expected: serde_json::Value,
    },
}

impl ValidationCheck {
    /// Evaluate the check against an invocation result.
    pub fn passes(&self, result: &serde_json::Value, success: bool) -> bool {
        match self {
            Self::ToolSucceeded => success,
            Self::ResultNonEmpty => match result {
                serde_json::Value::Null => false,
                serde_json::Value::String(s) => !s.is_empty(),
                serde_json::Value::Array(a) => !a.is_empty(),
                serde_json::Value::Object(o) => !o.is_empty(),
                _ => true,
            },
            Self::ResultContains { needle } => result.to_string().contains(needle.as_str()),
            Self::ResultEquals { expected } => result == expected,
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::ToolSucceeded => "tool_succeeded".to_string(),
            Self::ResultNonEmpty => "result_non_empty".to_string(),
            Self::ResultContains { needle } => format!("result_contains({needle})"),
            Self::ResultEquals { .. } => "result_equals".to_string(),
        }
    }
}

/// What to do when a step fails its invocation or validations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Re-invoke up to `count` more times, waiting `delay_ms` between
    /// attempts. Exhausting retries is a step failure.
    Retry {
        /// Additional attempts after the first.
        count: u32,
        /// Delay between attempts, milliseconds.
        delay_ms: u64,
    },
    /// Mark the step skipped. Downstream references resolve to the
    /// unavailable sentinel when `continue_on_skip` is set; otherwise
    /// dependents are skipped as well.
    Skip {
        /// Whether dependents may still run with the sentinel.
        continue_on_skip: bool,
    },
    /// Abort the whole replay immediately with the given message.
    Fail {
        /// Message surfaced to the dispatcher.
        message: String,
    },
    /// Abort the replay and ask the dispatcher to retry in learner mode.
    Escalate,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::Retry { count: 2, delay_ms: 1000 }
    }
}

/// Execution state of a single step during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet eligible to run.
    Pending,
    /// Currently invoking the tool.
    Running,
    /// Failed an attempt, waiting to re-invoke.
    Retrying,
    /// Terminal: tool invocation and validations passed.
    Success,
    /// Terminal: failed after its error policy was exhausted.
    Failed,
    /// Terminal: skipped under a skip policy (or cascaded from one).
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "retrying" => Some(Self::Retrying),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<StepStatus> {
        match self {
            Self::Pending => vec![Self::Running, Self::Skipped],
            Self::Running => vec![Self::Retrying, Self::Success, Self::Failed, Self::Skipped],
            Self::Retrying => vec![Self::Running, Self::Failed],
            Self::Success | Self::Failed | Self::Skipped => vec![],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// A single step of a replayable trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier, stable across serialization.
    pub id: Uuid,
    /// Name of the tool to invoke through the tool abstraction.
    pub tool_name: String,
    /// Ordered parameter map. Values may reference earlier step outputs.
    pub parameters: BTreeMap<String, ParamValue>,
    /// Checks run against the invocation result.
    pub validations: Vec<ValidationCheck>,
    /// Failure handling policy.
    pub error_policy: ErrorPolicy,
    /// Ids of steps that must reach a terminal state before this one runs.
    pub depends_on: BTreeSet<Uuid>,
}

impl Step {
    /// Create a step with no parameters, default policy and the
    /// tool-succeeded validation.
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            parameters: BTreeMap::new(),
            validations: vec![ValidationCheck::ToolSucceeded],
            error_policy: ErrorPolicy::default(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Add a literal parameter.
    pub fn with_literal(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), ParamValue::literal(value));
        self
    }

    /// Add a parameter referencing another step's output. The referenced
    /// step is also recorded as a dependency.
    pub fn with_output_ref(mut self, key: impl Into<String>, step_id: Uuid) -> Self {
        self.parameters.insert(key.into(), ParamValue::OutputOf(step_id));
        self.depends_on.insert(step_id);
        self
    }

    /// Add an explicit dependency edge without a parameter reference.
    pub fn with_dependency(mut self, step_id: Uuid) -> Self {
        self.depends_on.insert(step_id);
        self
    }

    /// Replace the error policy.
    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Append a validation check.
    pub fn with_validation(mut self, check: ValidationCheck) -> Self {
        self.validations.push(check);
        self
    }

    /// Iterate over step ids referenced by this step's parameters.
    pub fn referenced_steps(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.parameters.values().filter_map(ParamValue::referenced_step)
    }

    /// Run all validations against an invocation result, returning the
    /// first failing check.
    pub fn first_failed_validation(
        &self,
        result: &serde_json::Value,
        success: bool,
    ) -> Option<&ValidationCheck> {
        self.validations.iter().find(|c| !c.passes(result, success))
    }
}

/// Typed binding table mapping producing steps to their outputs.
///
/// Built incrementally while the DAG executes; parameter resolution goes
/// through this table only, which keeps dependency inference and cycle
/// detection sound.
#[derive(Debug, Default)]
pub struct BindingTable {
    outputs: HashMap<Uuid, serde_json::Value>,
    unavailable: BTreeSet<Uuid>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step's output.
    pub fn bind(&mut self, step_id: Uuid, output: serde_json::Value) {
        self.outputs.insert(step_id, output);
    }

    /// Record that a step's output will never be available (skipped step
    /// whose policy allows dependents to continue).
    pub fn mark_unavailable(&mut self, step_id: Uuid) {
        self.unavailable.insert(step_id);
    }

    /// Look up a step's output.
    pub fn get(&self, step_id: Uuid) -> Option<&serde_json::Value> {
        self.outputs.get(&step_id)
    }

    /// Resolve a step's parameters into concrete JSON values.
    ///
    /// Output references bind to the producing step's recorded output, or
    /// to the unavailable sentinel when the producer was skipped with
    /// `continue_on_skip`. A reference with neither is a
    /// [`TraceError::DependencyUnresolved`].
    pub fn resolve(&self, step: &Step) -> TraceResult<BTreeMap<String, serde_json::Value>> {
        let mut resolved = BTreeMap::new();
        for (key, value) in &step.parameters {
            let concrete = match value {
                ParamValue::Literal(v) => v.clone(),
                ParamValue::OutputOf(id) => {
                    if let Some(out) = self.outputs.get(id) {
                        out.clone()
                    } else if self.unavailable.contains(id) {
                        unavailable_sentinel()
                    } else {
                        return Err(TraceError::DependencyUnresolved {
                            step: step.id,
                            missing: *id,
                        });
                    }
                }
            };
            resolved.insert(key.clone(), concrete);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_builder() {
        let a = Step::new("fetch").with_literal("url", "https://example.com");
        let b = Step::new("parse").with_output_ref("input", a.id);

        assert_eq!(b.depends_on.len(), 1);
        assert!(b.depends_on.contains(&a.id));
        assert_eq!(b.referenced_steps().collect::<Vec<_>>(), vec![a.id]);
    }

    #[test]
    fn test_validation_checks() {
        let ok = serde_json::json!({"rows": 3});
        assert!(ValidationCheck::ToolSucceeded.passes(&ok, true));
        assert!(!ValidationCheck::ToolSucceeded.passes(&ok, false));
        assert!(ValidationCheck::ResultNonEmpty.passes(&ok, true));
        assert!(!ValidationCheck::ResultNonEmpty.passes(&serde_json::Value::Null, true));
        assert!(ValidationCheck::ResultContains { needle: "rows".into() }.passes(&ok, true));
        assert!(ValidationCheck::ResultEquals { expected: ok.clone() }.passes(&ok, true));
    }

    #[test]
    fn test_step_status_transitions() {
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Running));
        assert!(StepStatus::Running.can_transition_to(StepStatus::Retrying));
        assert!(StepStatus::Retrying.can_transition_to(StepStatus::Running));
        assert!(!StepStatus::Success.can_transition_to(StepStatus::Running));
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_binding_table_resolution() {
        let a = Step::new("produce");
        let b = Step::new("consume").with_output_ref("data", a.id);

        let mut bindings = BindingTable::new();
        bindings.bind(a.id, serde_json::json!("payload"));

        let resolved = bindings.resolve(&b).unwrap();
        assert_eq!(resolved["data"], serde_json::json!("payload"));
    }

    #[test]
    fn test_binding_table_unavailable_sentinel() {
        let a = Step::new("produce");
        let b = Step::new("consume").with_output_ref("data", a.id);

        let mut bindings = BindingTable::new();
        bindings.mark_unavailable(a.id);

        let resolved = bindings.resolve(&b).unwrap();
        assert!(is_unavailable(&resolved["data"]));
    }

    #[test]
    fn test_binding_table_missing_dependency() {
        let a = Step::new("produce");
        let b = Step::new("consume").with_output_ref("data", a.id);

        let bindings = BindingTable::new();
        let err = bindings.resolve(&b).unwrap_err();
        assert!(matches!(err, TraceError::DependencyUnresolved { missing, .. } if missing == a.id));
    }

    #[test]
    fn test_param_value_roundtrip() {
        let id = Uuid::new_v4();
        let reference = ParamValue::OutputOf(id);
        let json = serde_json::to_string(&reference).unwrap();
        let back: ParamValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reference);
    }
}
