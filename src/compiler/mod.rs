//! Workflow graph compiler.
//!
//! Compiles a validated document into a schedulable DAG: declared nodes plus
//! the implicit `start` and `end`, branch edges flattened, router conditions
//! parsed, and executors bound. The representation is index-based - nodes and
//! edges live in arrays and refer to each other by position - so the engine
//! can track readiness with plain counters instead of mutating a graph.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::executors::{Executor, ExecutorRegistry};
use crate::validation::CompiledSchema;
use crate::workflow::condition::CompiledCondition;
use crate::workflow::types::{Mapping, NodeKind, Workflow, END_NODE_ID, START_NODE_ID};

/// What a DAG node does when scheduled.
pub enum Step {
    /// Implicit entry: no-op passthrough, publishes nothing.
    Start,

    /// Implicit finish: strictly resolves the workflow output mapping and
    /// validates it against the output schema.
    End {
        input_mapping: Mapping,
        schema: CompiledSchema,
    },

    /// Engine-orchestrated branch selection. Cases keep declaration order.
    Router {
        cases: Vec<(String, CompiledCondition)>,
        default: Option<String>,
        output_mapping: Mapping,
    },

    /// An executor-backed node.
    Task {
        kind: String,
        strict: bool,
        input_mapping: Mapping,
        output_mapping: Mapping,
        config: Value,
        timeout: Option<Duration>,
        executor: Arc<dyn Executor>,
    },
}

impl Step {
    pub fn kind_name(&self) -> &str {
        match self {
            Step::Start => "start",
            Step::End { .. } => "end",
            Step::Router { .. } => "router",
            Step::Task { kind, .. } => kind,
        }
    }
}

/// A node in the compiled graph, with its adjacency recorded as edge indices.
pub struct DagNode {
    pub id: String,
    pub step: Step,
    pub incoming: Vec<usize>,
    pub outgoing: Vec<usize>,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.kind_name()).finish_non_exhaustive()
    }
}

impl std::fmt::Debug for DagNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagNode")
            .field("id", &self.id)
            .field("step", &self.step)
            .field("incoming", &self.incoming)
            .field("outgoing", &self.outgoing)
            .finish()
    }
}

/// A flattened edge. `when_label` marks a conditional edge out of a router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagEdge {
    pub from: usize,
    pub to: usize,
    pub when_label: Option<String>,
}

/// The compiled, schedulable form of a workflow.
#[derive(Debug)]
pub struct Dag {
    pub workflow_id: String,
    pub fail_fast: bool,
    pub input_schema: CompiledSchema,
    pub nodes: Vec<DagNode>,
    pub edges: Vec<DagEdge>,
    pub start: usize,
    pub end: usize,
    index: HashMap<String, usize>,
}

impl Dag {
    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }
}

/// Compile a workflow into a DAG.
///
/// Compilation is deterministic: node order follows declaration order (with
/// `start` first and `end` last) and edge order follows document order.
pub fn compile(workflow: &Workflow, registry: &ExecutorRegistry) -> Result<Dag> {
    let mut nodes: Vec<DagNode> = Vec::with_capacity(workflow.nodes.len() + 2);
    let mut index: HashMap<String, usize> = HashMap::new();

    nodes.push(DagNode {
        id: START_NODE_ID.to_string(),
        step: Step::Start,
        incoming: Vec::new(),
        outgoing: Vec::new(),
    });
    index.insert(START_NODE_ID.to_string(), 0);

    for node in &workflow.nodes {
        let step = compile_step(node, registry)?;
        index.insert(node.id.clone(), nodes.len());
        nodes.push(DagNode {
            id: node.id.clone(),
            step,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        });
    }

    let output_schema = CompiledSchema::output(&workflow.output.schema)
        .map_err(|e| Error::Compile(format!("Workflow output schema: {e}")))?;

    let end = nodes.len();
    nodes.push(DagNode {
        id: END_NODE_ID.to_string(),
        step: Step::End {
            input_mapping: workflow.output.input_mapping.clone(),
            schema: output_schema,
        },
        incoming: Vec::new(),
        outgoing: Vec::new(),
    });
    index.insert(END_NODE_ID.to_string(), end);

    let mut edges: Vec<DagEdge> = Vec::new();
    for edge in workflow.flattened_edges() {
        let from = *index
            .get(&edge.from)
            .ok_or_else(|| Error::Compile(format!("Edge from unknown node '{}'", edge.from)))?;
        let to = *index
            .get(&edge.to)
            .ok_or_else(|| Error::Compile(format!("Edge to unknown node '{}'", edge.to)))?;

        if edge.when_label.is_some() && !matches!(nodes[from].step, Step::Router { .. }) {
            return Err(Error::Compile(format!(
                "Conditional edge from non-router '{}'",
                edge.from
            )));
        }

        let edge_idx = edges.len();
        edges.push(DagEdge {
            from,
            to,
            when_label: edge.when_label,
        });
        nodes[from].outgoing.push(edge_idx);
        nodes[to].incoming.push(edge_idx);
    }

    reject_cycles(&nodes, &edges)?;

    let input_schema = CompiledSchema::input(&workflow.input.schema)
        .map_err(|e| Error::Compile(format!("Workflow input schema: {e}")))?;

    Ok(Dag {
        workflow_id: workflow.id.clone(),
        fail_fast: workflow.fail_fast,
        input_schema,
        nodes,
        edges,
        start: 0,
        end,
        index,
    })
}

fn compile_step(node: &crate::workflow::types::Node, registry: &ExecutorRegistry) -> Result<Step> {
    match &node.kind {
        NodeKind::Router { cases, default } => {
            let mut compiled = Vec::with_capacity(cases.len());
            for (label, condition) in cases {
                let parsed = CompiledCondition::compile(condition).map_err(|e| {
                    Error::Compile(format!(
                        "Router '{}' case '{}': {}",
                        node.id, label, e
                    ))
                })?;
                compiled.push((label.clone(), parsed));
            }
            Ok(Step::Router {
                cases: compiled,
                default: default.clone(),
                output_mapping: node.output_mapping.clone(),
            })
        }
        kind => {
            let kind_name = kind.name();
            let executor = registry.get(kind_name).ok_or_else(|| {
                Error::Compile(format!(
                    "No executor registered for kind '{}' (node '{}')",
                    kind_name, node.id
                ))
            })?;
            Ok(Step::Task {
                kind: kind_name.to_string(),
                strict: kind.strict_inputs(),
                input_mapping: node.input_mapping.clone(),
                output_mapping: node.output_mapping.clone(),
                config: kind.config_value(),
                timeout: kind.timeout(),
                executor,
            })
        }
    }
}

/// Kahn's algorithm: if a topological order does not cover every node, the
/// leftovers form a cycle.
fn reject_cycles(nodes: &[DagNode], edges: &[DagEdge]) -> Result<()> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.incoming.len()).collect();
    let mut queue: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0;

    while let Some(current) = queue.pop() {
        processed += 1;
        for &edge_idx in &nodes[current].outgoing {
            let target = edges[edge_idx].to;
            in_degree[target] -= 1;
            if in_degree[target] == 0 {
                queue.push(target);
            }
        }
    }

    if processed < nodes.len() {
        let stuck: Vec<&str> = (0..nodes.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| nodes[i].id.as_str())
            .collect();
        return Err(Error::Compile(format!(
            "Workflow graph contains a cycle involving: {}",
            stuck.join(", ")
        )));
    }

    Ok(())
}
