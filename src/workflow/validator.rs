//! Workflow document validation.
//!
//! Runs before compilation and reports every problem it can find, not just
//! the first one.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::mapping::is_valid_output_spec;
use super::reference::{is_reference, RefRoot, Reference};
use super::types::{
    is_valid_node_id, Edge, Mapping, NodeKind, SimpleEdge, Workflow, END_NODE_ID, START_NODE_ID,
};
use crate::executors::ExecutorRegistry;

/// One problem found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Where the problem is, e.g. `nodes[2].id` or `edges[0]`.
    pub location: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// The full validation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Collapse the report into a single human-readable message.
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|i| format!("{}: {}", i.location, i.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validate a workflow document against an executor registry.
///
/// Side-effect-free and idempotent: the same document and registry always
/// produce the same report.
pub fn validate_workflow(workflow: &Workflow, registry: &ExecutorRegistry) -> ValidationReport {
    let mut issues = Vec::new();

    if workflow.id.is_empty() {
        issues.push(ValidationIssue::new("id", "Workflow id must not be empty"));
    }

    check_output_schema(workflow, &mut issues);
    let node_ids = check_nodes(workflow, registry, &mut issues);
    let edges = workflow.flattened_edges();
    check_edges(workflow, &edges, &node_ids, &mut issues);
    check_reachability(&edges, &mut issues);
    check_references(workflow, &node_ids, &mut issues);

    ValidationReport {
        ok: issues.is_empty(),
        issues,
    }
}

fn check_output_schema(workflow: &Workflow, issues: &mut Vec<ValidationIssue>) {
    let schema_type = workflow.output.schema.get("type").and_then(Value::as_str);
    if schema_type != Some("object") {
        issues.push(ValidationIssue::new(
            "output.schema.type",
            "Output schema type must be \"object\"",
        ));
    }
}

fn check_nodes(
    workflow: &Workflow,
    registry: &ExecutorRegistry,
    issues: &mut Vec<ValidationIssue>,
) -> HashSet<String> {
    let mut seen: HashSet<String> = HashSet::new();

    for (idx, node) in workflow.nodes.iter().enumerate() {
        let location = format!("nodes[{idx}].id");

        if !is_valid_node_id(&node.id) {
            issues.push(ValidationIssue::new(
                &location,
                format!("Node id '{}' must match ^[a-z][a-z0-9_]*$", node.id),
            ));
        }
        if node.id == START_NODE_ID || node.id == END_NODE_ID {
            issues.push(ValidationIssue::new(
                &location,
                format!("'{}' is reserved and cannot be a node id", node.id),
            ));
        }
        if !seen.insert(node.id.clone()) {
            issues.push(ValidationIssue::new(
                &location,
                format!("Duplicate node id: {}", node.id),
            ));
        }

        // Router kinds are orchestrated by the engine; everything else
        // needs a registered executor.
        let kind = node.kind.name();
        if kind != "router" && !registry.has(kind) {
            issues.push(ValidationIssue::new(
                format!("nodes[{idx}].kind"),
                format!("No executor registered for kind '{kind}'"),
            ));
        }
    }

    seen
}

fn check_edges(
    workflow: &Workflow,
    edges: &[SimpleEdge],
    node_ids: &HashSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    let routers: HashMap<&str, &NodeKind> = workflow
        .nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Router { .. }))
        .map(|n| (n.id.as_str(), &n.kind))
        .collect();

    for (idx, edge) in workflow.edges.iter().enumerate() {
        if let Edge::Branch(branch) = edge {
            if branch.routes.is_empty() {
                issues.push(ValidationIssue::new(
                    format!("edges[{idx}].routes"),
                    "Branch edge routes must be non-empty",
                ));
            }
        }
    }

    let known = |id: &str| id == START_NODE_ID || id == END_NODE_ID || node_ids.contains(id);

    for (idx, edge) in edges.iter().enumerate() {
        let location = format!("edges[{idx}]");

        if !known(&edge.from) {
            issues.push(ValidationIssue::new(
                &location,
                format!("Edge from unknown node '{}'", edge.from),
            ));
        }
        if !known(&edge.to) {
            issues.push(ValidationIssue::new(
                &location,
                format!("Edge to unknown node '{}'", edge.to),
            ));
        }
        if edge.from == END_NODE_ID {
            issues.push(ValidationIssue::new(&location, "Edge cannot leave 'end'"));
        }
        if edge.to == START_NODE_ID {
            issues.push(ValidationIssue::new(&location, "Edge cannot enter 'start'"));
        }

        match (routers.get(edge.from.as_str()), &edge.when_label) {
            (Some(NodeKind::Router { cases, default }), Some(label)) => {
                let declared =
                    cases.contains_key(label) || default.as_deref() == Some(label.as_str());
                if !declared {
                    issues.push(ValidationIssue::new(
                        &location,
                        format!(
                            "when_label '{}' is not a case label of router '{}'",
                            label, edge.from
                        ),
                    ));
                }
            }
            (Some(_), None) => {
                issues.push(ValidationIssue::new(
                    &location,
                    format!("Outgoing edges of router '{}' must carry when_label", edge.from),
                ));
            }
            (None, Some(_)) => {
                issues.push(ValidationIssue::new(
                    &location,
                    format!("when_label on edge from non-router '{}'", edge.from),
                ));
            }
            (None, None) => {}
            (Some(_), Some(_)) => unreachable!("routers map only contains Router nodes"),
        }
    }

    if !edges.iter().any(|e| e.from == START_NODE_ID) {
        issues.push(ValidationIssue::new(
            "edges",
            "Workflow must have at least one edge from 'start'",
        ));
    }
}

/// BFS from `start`: `end` must be reachable through some path.
fn check_reachability(edges: &[SimpleEdge], issues: &mut Vec<ValidationIssue>) {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(START_NODE_ID);
    visited.insert(START_NODE_ID);

    while let Some(current) = queue.pop_front() {
        if current == END_NODE_ID {
            return;
        }
        for next in adjacency.get(current).into_iter().flatten() {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    issues.push(ValidationIssue::new(
        "edges",
        "No path from 'start' reaches 'end'",
    ));
}

/// Check every reference string in mappings and conditions: syntax per the
/// reference grammar, and `$nodes.<id>` must name a declared node.
fn check_references(
    workflow: &Workflow,
    node_ids: &HashSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    for (idx, node) in workflow.nodes.iter().enumerate() {
        check_input_mapping(
            &node.input_mapping,
            &format!("nodes[{idx}].input_mapping"),
            node_ids,
            issues,
        );
        check_output_mapping(
            &node.output_mapping,
            &format!("nodes[{idx}].output_mapping"),
            issues,
        );

        if let NodeKind::Router { cases, .. } = &node.kind {
            for (label, condition) in cases {
                check_condition_refs(
                    condition,
                    &format!("nodes[{idx}].cases.{label}"),
                    node_ids,
                    issues,
                );
            }
        }
    }

    check_input_mapping(
        &workflow.output.input_mapping,
        "output.input_mapping",
        node_ids,
        issues,
    );
}

fn check_input_mapping(
    mapping: &Mapping,
    location: &str,
    node_ids: &HashSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    for (key, value) in mapping {
        if !is_reference(value) {
            continue;
        }
        let expr = value.as_str().unwrap_or_default();
        match Reference::parse(expr) {
            Ok(reference) => {
                if let RefRoot::Node(id) = &reference.root {
                    if !node_ids.contains(id) {
                        issues.push(ValidationIssue::new(
                            format!("{location}.{key}"),
                            format!("Reference to undeclared node '{id}'"),
                        ));
                    }
                }
            }
            Err(e) => {
                issues.push(ValidationIssue::new(format!("{location}.{key}"), e.to_string()));
            }
        }
    }
}

fn check_output_mapping(mapping: &Mapping, location: &str, issues: &mut Vec<ValidationIssue>) {
    for (key, value) in mapping {
        if !is_valid_output_spec(value) {
            issues.push(ValidationIssue::new(
                format!("{location}.{key}"),
                "Output mapping value must be a raw-result sentinel, a '$.' field selector, or a constant",
            ));
        }
    }
}

/// Conditions get their references checked here; the full expression grammar
/// is enforced by the compiler.
fn check_condition_refs(
    condition: &str,
    location: &str,
    node_ids: &HashSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    if condition.trim() == "else" {
        return;
    }

    let mut rest = condition;
    while let Some(pos) = rest.find('$') {
        let token: String = rest[pos..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.' || *c == '$')
            .collect();
        let token = token.trim_end_matches('.');
        match Reference::parse(token) {
            Ok(reference) => {
                if let RefRoot::Node(id) = &reference.root {
                    if !node_ids.contains(id) {
                        issues.push(ValidationIssue::new(
                            location,
                            format!("Condition references undeclared node '{id}'"),
                        ));
                    }
                }
            }
            Err(e) => issues.push(ValidationIssue::new(location, e.to_string())),
        }
        rest = &rest[pos + token.len().max(1)..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::parse_document_value;
    use serde_json::json;

    fn registry() -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        registry.register_fn("python_code", |input, _ctx| async move { Ok(input) });
        registry.register_fn("jq_transform", |input, _ctx| async move { Ok(input) });
        registry
    }

    fn base_doc() -> Value {
        json!({
            "id": "wf_1",
            "version": 1,
            "input": {"schema": {"type": "object"}},
            "output": {
                "schema": {"type": "object"},
                "input_mapping": {"x": "$nodes.step_one.x"},
            },
            "nodes": [
                {"id": "step_one", "kind": "noop", "input_mapping": {"x": "$input.x"}},
            ],
            "edges": [
                {"from": "start", "to": "step_one"},
                {"from": "step_one", "to": "end"},
            ],
        })
    }

    fn validate(doc: Value) -> ValidationReport {
        let workflow = parse_document_value(doc).unwrap();
        validate_workflow(&workflow, &registry())
    }

    #[test]
    fn test_valid_document() {
        let report = validate(base_doc());
        assert!(report.ok, "{}", report.summary());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let workflow = parse_document_value(base_doc()).unwrap();
        let registry = registry();
        let first = validate_workflow(&workflow, &registry);
        let second = validate_workflow(&workflow, &registry);
        assert_eq!(first.ok, second.ok);
        assert_eq!(first.issues, second.issues);
    }

    #[test]
    fn test_reserved_node_ids_rejected() {
        let mut doc = base_doc();
        doc["nodes"][0]["id"] = json!("start");
        doc["edges"] = json!([
            {"from": "start", "to": "end"},
        ]);
        doc["output"]["input_mapping"] = json!({});
        let report = validate(doc);
        assert!(!report.ok);
        assert!(report.summary().contains("reserved"));
    }

    #[test]
    fn test_bad_node_id_pattern() {
        let mut doc = base_doc();
        doc["nodes"][0]["id"] = json!("StepOne");
        let report = validate(doc);
        assert!(report.summary().contains("must match"));
    }

    #[test]
    fn test_duplicate_node_ids() {
        let mut doc = base_doc();
        doc["nodes"] = json!([
            {"id": "step_one", "kind": "noop"},
            {"id": "step_one", "kind": "noop"},
        ]);
        let report = validate(doc);
        assert!(report.summary().contains("Duplicate node id"));
    }

    #[test]
    fn test_edge_to_unknown_node() {
        let mut doc = base_doc();
        doc["edges"][1]["to"] = json!("ghost");
        let report = validate(doc);
        assert!(report.summary().contains("unknown node 'ghost'"));
    }

    #[test]
    fn test_missing_start_edge() {
        let mut doc = base_doc();
        doc["edges"] = json!([{"from": "step_one", "to": "end"}]);
        let report = validate(doc);
        assert!(report.summary().contains("edge from 'start'"));
    }

    #[test]
    fn test_end_unreachable() {
        let mut doc = base_doc();
        doc["edges"] = json!([{"from": "start", "to": "step_one"}]);
        let report = validate(doc);
        assert!(report.summary().contains("reaches 'end'"));
    }

    #[test]
    fn test_unknown_executor_kind() {
        let mut doc = base_doc();
        doc["nodes"][0] = json!({"id": "step_one", "kind": "llm", "model": "m", "prompt": "p"});
        let report = validate(doc);
        assert!(report.summary().contains("No executor registered"));
    }

    #[test]
    fn test_reference_to_undeclared_node() {
        let mut doc = base_doc();
        doc["output"]["input_mapping"] = json!({"x": "$nodes.ghost.x"});
        let report = validate(doc);
        assert!(report.summary().contains("undeclared node 'ghost'"));
    }

    #[test]
    fn test_invalid_reference_syntax() {
        let mut doc = base_doc();
        doc["nodes"][0]["input_mapping"] = json!({"x": "$bogus.path"});
        let report = validate(doc);
        assert!(report.summary().contains("Unsupported reference"));
    }

    #[test]
    fn test_invalid_output_mapping_spec() {
        let mut doc = base_doc();
        doc["nodes"][0]["output_mapping"] = json!({"x": "$nodes.other.x"});
        let report = validate(doc);
        assert!(report.summary().contains("sentinel"));
    }

    #[test]
    fn test_output_schema_must_be_object() {
        let mut doc = base_doc();
        doc["output"]["schema"] = json!({"type": "array"});
        let report = validate(doc);
        assert!(report.summary().contains("must be \"object\""));
    }

    #[test]
    fn test_router_edge_rules() {
        let mut doc = base_doc();
        doc["nodes"] = json!([
            {"id": "route", "kind": "router", "cases": {"a": "$input.x == 1"}},
            {"id": "step_one", "kind": "noop"},
        ]);
        doc["edges"] = json!([
            {"from": "start", "to": "route"},
            {"from": "route", "to": "step_one", "when_label": "nope"},
            {"from": "step_one", "to": "end"},
        ]);
        let report = validate(doc);
        assert!(report.summary().contains("not a case label"));

        // Unlabeled edge out of a router.
        let mut doc = base_doc();
        doc["nodes"] = json!([
            {"id": "route", "kind": "router", "cases": {"a": "$input.x == 1"}},
            {"id": "step_one", "kind": "noop"},
        ]);
        doc["edges"] = json!([
            {"from": "start", "to": "route"},
            {"from": "route", "to": "step_one"},
            {"from": "step_one", "to": "end"},
        ]);
        let report = validate(doc);
        assert!(report.summary().contains("must carry when_label"));

        // Label on an edge from a non-router.
        let mut doc = base_doc();
        doc["edges"] = json!([
            {"from": "start", "to": "step_one"},
            {"from": "step_one", "to": "end", "when_label": "x"},
        ]);
        let report = validate(doc);
        assert!(report.summary().contains("non-router"));
    }

    #[test]
    fn test_condition_reference_to_undeclared_node() {
        let mut doc = base_doc();
        doc["nodes"] = json!([
            {"id": "route", "kind": "router", "cases": {"a": "$nodes.ghost.x == 1"}, "default": "a"},
            {"id": "step_one", "kind": "noop"},
        ]);
        doc["edges"] = json!([
            {"from": "start", "to": "route"},
            {"from": "route", "to": "step_one", "when_label": "a"},
            {"from": "step_one", "to": "end"},
        ]);
        let report = validate(doc);
        assert!(report.summary().contains("undeclared node 'ghost'"));
    }

    #[test]
    fn test_multiple_issues_collected() {
        let mut doc = base_doc();
        doc["nodes"][0]["id"] = json!("Bad-Id");
        doc["output"]["schema"] = json!({"type": "string"});
        doc["output"]["input_mapping"] = json!({"x": "$nodes.ghost.x"});
        doc["edges"] = json!([{"from": "start", "to": "nowhere"}]);
        let report = validate(doc);
        assert!(!report.ok);
        assert!(report.issues.len() >= 4, "{}", report.summary());
    }
}
