use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One capability invocation as the planner emitted it.
///
/// The capability name stays a plain string here: unknown names are resolved
/// at dispatch time, not rejected while reading the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Invocation {
    /// Capability name, e.g. `code_search`.
    #[serde(rename = "tool", alias = "capability")]
    pub capability: String,
    /// Argument object for the capability.
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Plan {
    /// Human-readable steps, in execution order.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Capability invocations, executed strictly in this order.
    #[serde(rename = "toolCalls", alias = "invocations", default)]
    pub invocations: Vec<Invocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InvocationOutcome {
    Failed { error: String },
    Success(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationResult {
    #[serde(rename = "tool")]
    pub capability: String,
    pub result: InvocationOutcome,
}

impl InvocationResult {
    pub fn success(capability: impl Into<String>, value: Value) -> Self {
        Self {
            capability: capability.into(),
            result: InvocationOutcome::Success(value),
        }
    }

    pub fn failed(capability: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            result: InvocationOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.result, InvocationOutcome::Failed { .. })
    }
}
