//! Mutable workflow state shared across node executions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single error produced during execution.
///
/// `error_type` is a machine-parseable code (see [`crate::Error::code`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub node_id: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ErrorRecord {
    pub fn new(node_id: &str, error_type: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            error_type: error_type.to_string(),
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// The single mutable record a workflow run operates on.
///
/// Invariants maintained by the engine:
/// - a node id appears in `data` only after its executor completed successfully;
/// - once written, `data[id]` is never mutated;
/// - `errors` is append-only, ordered by completion;
/// - `router_labels[r]` is set exactly once, before any conditional edge of
///   `r` is considered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowState {
    /// Original invocation input.
    pub input: Value,

    /// Published node outputs, keyed by node id.
    pub data: HashMap<String, Value>,

    /// Errors in completion order.
    pub errors: Vec<ErrorRecord>,

    /// Final output, set by the implicit end node.
    pub output: Option<Value>,

    /// Most recently completed node.
    pub last_node: Option<String>,

    /// Selected label per router id.
    pub router_labels: HashMap<String, String>,
}

impl WorkflowState {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            ..Default::default()
        }
    }

    /// Publish a node's output. Panics in debug builds on double publication,
    /// which would violate the write-once invariant.
    pub fn publish(&mut self, node_id: &str, output: Value) {
        debug_assert!(
            !self.data.contains_key(node_id),
            "node '{node_id}' published twice"
        );
        self.data.insert(node_id.to_string(), output);
        self.last_node = Some(node_id.to_string());
    }

    /// Append an error record.
    pub fn record_error(&mut self, record: ErrorRecord) {
        self.last_node = Some(record.node_id.clone());
        self.errors.push(record);
    }

    /// Look up a top-level state key for `$state.<k>` references.
    pub fn state_key(&self, key: &str) -> Option<Value> {
        match key {
            "input" => Some(self.input.clone()),
            "data" => serde_json::to_value(&self.data).ok(),
            "errors" => serde_json::to_value(&self.errors).ok(),
            "output" => Some(self.output.clone().unwrap_or(Value::Null)),
            "last_node" => Some(
                self.last_node
                    .as_ref()
                    .map(|n| Value::String(n.clone()))
                    .unwrap_or(Value::Null),
            ),
            "router_labels" => serde_json::to_value(&self.router_labels).ok(),
            _ => None,
        }
    }
}
