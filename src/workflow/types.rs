//! Workflow document model.
//!
//! A workflow is a declarative YAML/JSON document: a set of nodes, the edges
//! connecting them, an input schema, and an output mapping. The implicit
//! `start` and `end` nodes are never declared; edges may reference them.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A mapping from names to constants or `$...` reference strings.
pub type Mapping = serde_json::Map<String, Value>;

/// Reserved id of the implicit entry node.
pub const START_NODE_ID: &str = "start";
/// Reserved id of the implicit finish node.
pub const END_NODE_ID: &str = "end";

fn default_object_schema() -> Value {
    serde_json::json!({"type": "object"})
}

fn default_true() -> bool {
    true
}

/// A complete workflow definition.
///
/// # Example YAML
///
/// ```yaml
/// id: double_it
/// version: 1
/// input:
///   schema:
///     type: object
///     properties:
///       x: { type: integer }
/// nodes:
///   - id: double
///     kind: python_code
///     input_mapping: { x: $input.x }
///     code: "return {\"value\": input[\"x\"] * 2}"
/// edges:
///   - { from: start, to: double }
///   - { from: double, to: end }
/// output:
///   input_mapping: { doubled: $nodes.double.value }
///   schema:
///     type: object
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    /// Unique workflow identifier.
    pub id: String,

    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Author-owned version number; not interpreted by the runtime.
    pub version: i64,

    /// Invocation input contract.
    #[serde(default)]
    pub input: InputSpec,

    /// Final output contract.
    pub output: OutputSpec,

    /// User-declared nodes. MUST NOT contain `start` or `end`.
    pub nodes: Vec<Node>,

    /// Connectivity. MAY reference `start` and `end`.
    pub edges: Vec<Edge>,

    /// Stop scheduling new nodes as soon as any node fails.
    #[serde(default = "default_true")]
    pub fail_fast: bool,
}

/// Workflow input contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    /// JSON Schema applied to the invocation input.
    #[serde(default = "default_object_schema")]
    pub schema: Value,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            schema: default_object_schema(),
        }
    }
}

/// Workflow output contract, evaluated by the implicit `end` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Mapping resolved (strictly) into the final output object.
    pub input_mapping: Mapping,

    /// JSON Schema for the final output. `type` must be `"object"`.
    #[serde(default = "default_object_schema")]
    pub schema: Value,
}

/// A user-declared node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node id, `^[a-z][a-z0-9_]*$`, never `start`/`end`.
    pub id: String,

    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Expressions resolved into the executor's input object.
    #[serde(default)]
    pub input_mapping: Mapping,

    /// Shapes the raw executor result before publication. Empty mapping
    /// publishes the raw result unchanged.
    #[serde(default)]
    pub output_mapping: Mapping,

    /// Kind tag plus kind-specific configuration.
    #[serde(flatten)]
    pub kind: NodeKind,
}

fn default_code_timeout() -> f64 {
    1.0
}

fn default_http_timeout() -> f64 {
    30.0
}

/// Node kinds and their kind-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Copies resolved inputs to outputs.
    Noop,

    /// Sandboxed code execution.
    PythonCode {
        code: String,
        #[serde(default = "default_code_timeout")]
        timeout_s: f64,
    },

    /// JQ program over the resolved inputs.
    JqTransform { code: String },

    /// Conditional branch selection. `cases` is ordered: the first truthy
    /// condition wins; `default` applies when none match.
    Router {
        cases: IndexMap<String, String>,
        #[serde(default)]
        default: Option<String>,
    },

    /// LLM invocation.
    Llm {
        model: String,
        prompt: Value,
        #[serde(default)]
        model_params: Mapping,
        #[serde(default)]
        output_schema: Option<Value>,
    },

    /// Outbound HTTP request. Request fields (`url`, `method`, `headers`,
    /// body keys) arrive through the input mapping.
    HttpRequest {
        #[serde(default = "default_http_timeout")]
        timeout_s: f64,
    },

    /// External tool bridge, dispatched by tool registry key.
    Tool {
        #[serde(rename = "type")]
        tool_type: String,
        #[serde(default)]
        config: Mapping,
    },
}

impl NodeKind {
    /// The kind tag as it appears in documents.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Noop => "noop",
            NodeKind::PythonCode { .. } => "python_code",
            NodeKind::JqTransform { .. } => "jq_transform",
            NodeKind::Router { .. } => "router",
            NodeKind::Llm { .. } => "llm",
            NodeKind::HttpRequest { .. } => "http_request",
            NodeKind::Tool { .. } => "tool",
        }
    }

    /// Whether input resolution fails on missing references.
    ///
    /// JQ nodes resolve non-strictly so they can pick from optional branch
    /// outputs (`.a // .b`); everything else is strict.
    pub fn strict_inputs(&self) -> bool {
        !matches!(self, NodeKind::JqTransform { .. })
    }

    /// Wall-clock timeout enforced by the engine, where the kind defines one.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            NodeKind::PythonCode { timeout_s, .. } | NodeKind::HttpRequest { timeout_s } => {
                Some(Duration::from_secs_f64(timeout_s.max(0.0)))
            }
            _ => None,
        }
    }

    /// Kind-specific configuration handed to the executor.
    pub fn config_value(&self) -> Value {
        match self {
            NodeKind::Noop => serde_json::json!({}),
            NodeKind::PythonCode { code, timeout_s } => {
                serde_json::json!({"code": code, "timeout_s": timeout_s})
            }
            NodeKind::JqTransform { code } => serde_json::json!({"code": code}),
            NodeKind::Router { cases, default } => serde_json::json!({
                "cases": cases
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect::<serde_json::Map<String, Value>>(),
                "default": default,
            }),
            NodeKind::Llm {
                model,
                prompt,
                model_params,
                output_schema,
            } => serde_json::json!({
                "model": model,
                "prompt": prompt,
                "model_params": model_params,
                "output_schema": output_schema,
            }),
            NodeKind::HttpRequest { timeout_s } => serde_json::json!({"timeout_s": timeout_s}),
            NodeKind::Tool { tool_type, config } => {
                serde_json::json!({"type": tool_type, "config": config})
            }
        }
    }
}

/// An edge in the workflow graph, in either of its two document forms.
///
/// Branch edges are flattened into simple edges during compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Edge {
    Simple(SimpleEdge),
    Branch(BranchEdge),
}

/// `{from, to, when_label?}`. An edge carrying a `when_label` is conditional
/// and must originate from a router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleEdge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_label: Option<String>,
}

/// `{from, routes: [{to, when_label?}, ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchEdge {
    pub from: String,
    pub routes: Vec<EdgeRoute>,
}

/// One route of a branch edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRoute {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_label: Option<String>,
}

impl Edge {
    /// Flatten into simple edges, preserving declaration order.
    pub fn flatten(&self) -> Vec<SimpleEdge> {
        match self {
            Edge::Simple(e) => vec![e.clone()],
            Edge::Branch(b) => b
                .routes
                .iter()
                .map(|r| SimpleEdge {
                    from: b.from.clone(),
                    to: r.to.clone(),
                    when_label: r.when_label.clone(),
                })
                .collect(),
        }
    }
}

impl Workflow {
    /// Get a declared node by id.
    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All document edges, flattened to the simple form.
    pub fn flattened_edges(&self) -> Vec<SimpleEdge> {
        self.edges.iter().flat_map(|e| e.flatten()).collect()
    }
}

/// Check a node id against `^[a-z][a-z0-9_]*$`.
pub fn is_valid_node_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
