//! Concurrent DAG scheduler.
//!
//! The engine walks the compiled graph forward: a node becomes ready when
//! every incoming edge has been resolved and at least one of them was
//! satisfied by an executed predecessor. Readiness is tracked with per-node
//! counters; edge pruning never mutates the graph.
//!
//! `start`, `end`, and routers are synchronous and execute inline in the
//! scheduler loop. Executor-backed nodes are spawned as tasks into a
//! `JoinSet`; the loop publishes their results as they complete.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::state::{ErrorRecord, WorkflowState};
use crate::compiler::{Dag, Step};
use crate::error::Error;
use crate::executors::{CancelSignal, ExecutorContext};
use crate::workflow::mapping::{apply_output_mapping, resolve_input_mapping};
use crate::workflow::reference::ResolveOptions;

/// Executes a compiled workflow.
pub struct Engine {
    dag: Arc<Dag>,
}

/// How a completed (or skipped) node resolves its outgoing edges.
enum EdgeOutcome {
    /// Every outgoing edge is satisfied.
    Satisfied,
    /// Every outgoing edge is pruned (skipped node).
    Pruned,
    /// Router: only edges carrying this label are satisfied.
    Label(String),
}

fn lock_state(state: &Mutex<WorkflowState>) -> MutexGuard<'_, WorkflowState> {
    // Executor tasks never panic while holding the lock, but a poisoned
    // state is still more useful than an abort.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Engine {
    pub fn new(dag: Dag) -> Self {
        Self { dag: Arc::new(dag) }
    }

    /// Run the workflow to completion and return the final state.
    ///
    /// Node-level failures are recorded in `state.errors`; this only fails
    /// at the type level for infrastructure reasons, which are reported the
    /// same way.
    #[instrument(name = "workflow.run", skip(self, input), fields(workflow_id = %self.dag.workflow_id))]
    pub async fn run(&self, input: Value) -> WorkflowState {
        let mut scheduler = Scheduler::new(self.dag.clone(), input);
        scheduler.run().await
    }
}

struct Scheduler {
    dag: Arc<Dag>,
    state: Arc<Mutex<WorkflowState>>,
    cancel: CancelSignal,
    /// Unresolved incoming edges per node.
    remaining: Vec<usize>,
    /// Whether at least one incoming edge was satisfied.
    live: Vec<bool>,
    ready: VecDeque<usize>,
    halted: bool,
}

impl Scheduler {
    fn new(dag: Arc<Dag>, input: Value) -> Self {
        let remaining: Vec<usize> = dag.nodes.iter().map(|n| n.incoming.len()).collect();
        let node_count = dag.nodes.len();
        let start = dag.start;

        let mut scheduler = Self {
            dag,
            state: Arc::new(Mutex::new(WorkflowState::new(input))),
            cancel: CancelSignal::new(),
            remaining,
            live: vec![false; node_count],
            ready: VecDeque::new(),
            halted: false,
        };
        scheduler.live[start] = true;
        scheduler.ready.push_back(start);
        scheduler
    }

    async fn run(&mut self) -> WorkflowState {
        let mut tasks: JoinSet<(usize, Result<Value, ErrorRecord>)> = JoinSet::new();
        let mut inflight: HashMap<tokio::task::Id, usize> = HashMap::new();

        loop {
            self.drain_ready(&mut tasks, &mut inflight);

            if tasks.is_empty() {
                break;
            }

            match tasks.join_next_with_id().await {
                Some(Ok((task_id, (idx, outcome)))) => {
                    inflight.remove(&task_id);
                    self.handle_completion(idx, outcome);
                }
                Some(Err(join_error)) => {
                    if let Some(idx) = inflight.remove(&join_error.id()) {
                        let node_id = self.dag.nodes[idx].id.clone();
                        self.handle_completion(
                            idx,
                            Err(ErrorRecord::new(
                                &node_id,
                                "EXECUTOR_ERROR",
                                format!("Executor task aborted: {join_error}"),
                            )),
                        );
                    } else {
                        warn!("Untracked executor task aborted: {join_error}");
                    }
                }
                None => break,
            }
        }

        let state = lock_state(&self.state).clone();
        info!(
            errors = state.errors.len(),
            halted = self.halted,
            "Workflow run finished"
        );
        state
    }

    /// Process the ready queue: run synchronous steps inline, spawn tasks
    /// for executor-backed nodes.
    fn drain_ready(
        &mut self,
        tasks: &mut JoinSet<(usize, Result<Value, ErrorRecord>)>,
        inflight: &mut HashMap<tokio::task::Id, usize>,
    ) {
        let dag = self.dag.clone();
        while let Some(idx) = self.ready.pop_front() {
            if self.halted {
                return;
            }
            match &dag.nodes[idx].step {
                Step::Start => {
                    debug!("Entering workflow '{}'", dag.workflow_id);
                    self.resolve_outgoing(idx, EdgeOutcome::Satisfied);
                }
                Step::End { .. } => self.run_end(idx),
                Step::Router { .. } => self.run_router(idx),
                Step::Task { .. } => self.spawn_task(idx, tasks, inflight),
            }
        }
    }

    fn spawn_task(
        &mut self,
        idx: usize,
        tasks: &mut JoinSet<(usize, Result<Value, ErrorRecord>)>,
        inflight: &mut HashMap<tokio::task::Id, usize>,
    ) {
        let dag = self.dag.clone();
        let state = self.state.clone();
        let cancel = self.cancel.clone();

        let handle = tasks.spawn(async move {
            let node = &dag.nodes[idx];
            let Step::Task {
                kind,
                strict,
                input_mapping,
                config,
                timeout,
                executor,
                ..
            } = &node.step
            else {
                return (
                    idx,
                    Err(ErrorRecord::new(
                        &node.id,
                        "INTERNAL_ERROR",
                        "Scheduled a non-task step as an executor task",
                    )),
                );
            };

            info!("Executing node '{}' [{}]", node.id, kind);

            let options = if *strict {
                ResolveOptions::STRICT
            } else {
                ResolveOptions::LENIENT
            };
            let resolved = {
                let state = lock_state(&state);
                resolve_input_mapping(input_mapping, &state, options)
            };
            let resolved = match resolved {
                Ok(v) => v,
                Err(e) => {
                    return (
                        idx,
                        Err(ErrorRecord::new(&node.id, e.code(), e.to_string())),
                    )
                }
            };

            let ctx = ExecutorContext {
                node_id: node.id.clone(),
                config: config.clone(),
                cancel,
            };

            let result = match timeout {
                Some(limit) => match tokio::time::timeout(*limit, executor.execute(resolved, &ctx))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!(
                        "Node '{}' timed out after {:.3}s",
                        node.id,
                        limit.as_secs_f64()
                    ))),
                },
                None => executor.execute(resolved, &ctx).await,
            };

            (
                idx,
                result.map_err(|e| ErrorRecord::new(&node.id, e.code(), e.to_string())),
            )
        });
        inflight.insert(handle.id(), idx);
    }

    /// Publish a finished task's result, or record its failure.
    fn handle_completion(&mut self, idx: usize, outcome: Result<Value, ErrorRecord>) {
        let dag = self.dag.clone();
        let node = &dag.nodes[idx];
        match outcome {
            Ok(raw) => {
                if self.halted {
                    // Post-cancel completion: the result is dropped, not
                    // published.
                    debug!("Discarding result of '{}' after halt", node.id);
                    return;
                }
                let Step::Task { output_mapping, .. } = &node.step else {
                    return;
                };
                let shaped = apply_output_mapping(output_mapping, &raw);
                lock_state(&self.state).publish(&node.id, shaped);
                info!("Node '{}' completed", node.id);
                self.resolve_outgoing(idx, EdgeOutcome::Satisfied);
            }
            Err(record) => {
                warn!("Node '{}' failed: {}", node.id, record.message);
                lock_state(&self.state).record_error(record);
                self.handle_failure(idx, EdgeOutcome::Satisfied);
            }
        }
    }

    /// React to a node failure. Under fail-fast the run halts; otherwise the
    /// node's outgoing edges resolve with `continue_outcome`: satisfied for
    /// task failures (downstream strict references fail at the consumer),
    /// pruned for router failures (no branch was selected).
    fn handle_failure(&mut self, idx: usize, continue_outcome: EdgeOutcome) {
        if self.dag.fail_fast {
            if !self.halted {
                info!("Fail-fast triggered; cancelling in-flight nodes");
                self.halted = true;
                self.cancel.cancel();
            }
        } else {
            self.resolve_outgoing(idx, continue_outcome);
        }
    }

    /// Router evaluation: first truthy case wins, then `default`. A case
    /// that errors at evaluation time counts as false.
    fn run_router(&mut self, idx: usize) {
        let dag = self.dag.clone();
        let node = &dag.nodes[idx];
        let Step::Router {
            cases,
            default,
            output_mapping,
        } = &node.step
        else {
            return;
        };

        let selected = {
            let state = lock_state(&self.state);
            let mut selected = None;
            for (label, condition) in cases {
                match condition.evaluate(&state) {
                    Ok(true) => {
                        selected = Some(label.clone());
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            "Router '{}' case '{}' evaluation failed (treated as false): {}",
                            node.id, label, e
                        );
                    }
                }
            }
            selected.or_else(|| default.clone())
        };

        match selected {
            Some(label) => {
                info!("Router '{}' selected label '{}'", node.id, label);
                let shaped =
                    apply_output_mapping(output_mapping, &serde_json::json!({"label": label}));
                {
                    let mut state = lock_state(&self.state);
                    state.publish(&node.id, shaped);
                    state.router_labels.insert(node.id.clone(), label.clone());
                }
                self.resolve_outgoing(idx, EdgeOutcome::Label(label));
            }
            None => {
                lock_state(&self.state).record_error(ErrorRecord::new(
                    &node.id,
                    "ROUTER_NO_MATCH",
                    format!("Router '{}' matched no case and has no default", node.id),
                ));
                self.handle_failure(idx, EdgeOutcome::Pruned);
            }
        }
    }

    /// End node: strictly resolve the output mapping, validate it against
    /// the output schema, and set `state.output`.
    fn run_end(&mut self, idx: usize) {
        let dag = self.dag.clone();
        let node = &dag.nodes[idx];
        let Step::End {
            input_mapping,
            schema,
        } = &node.step
        else {
            return;
        };

        let outcome = {
            let state = lock_state(&self.state);
            resolve_input_mapping(input_mapping, &state, ResolveOptions::STRICT).and_then(
                |output| {
                    schema.check(&output)?;
                    Ok(output)
                },
            )
        };

        match outcome {
            Ok(output) => {
                debug!("Workflow output computed");
                let mut state = lock_state(&self.state);
                state.output = Some(output);
                state.last_node = Some(node.id.clone());
            }
            Err(e) => {
                lock_state(&self.state)
                    .record_error(ErrorRecord::new(&node.id, e.code(), e.to_string()));
                self.handle_failure(idx, EdgeOutcome::Pruned);
            }
        }
    }

    /// Resolve the outgoing edges of a finished node and schedule (or skip)
    /// any target whose last dependency this was. Skips propagate through
    /// the worklist: a node with no satisfied incoming edge prunes its own
    /// outgoing edges in turn.
    fn resolve_outgoing(&mut self, from: usize, outcome: EdgeOutcome) {
        let dag = self.dag.clone();
        let mut work: Vec<(usize, EdgeOutcome)> = vec![(from, outcome)];

        while let Some((node, outcome)) = work.pop() {
            for &edge_idx in &dag.nodes[node].outgoing {
                let edge = &dag.edges[edge_idx];
                let satisfied = match &outcome {
                    EdgeOutcome::Satisfied => true,
                    EdgeOutcome::Pruned => false,
                    EdgeOutcome::Label(label) => edge.when_label.as_deref() == Some(label.as_str()),
                };

                self.remaining[edge.to] -= 1;
                if satisfied {
                    self.live[edge.to] = true;
                }

                if self.remaining[edge.to] == 0 {
                    if self.live[edge.to] {
                        self.ready.push_back(edge.to);
                    } else {
                        debug!("Skipping node '{}' (all paths pruned)", dag.nodes[edge.to].id);
                        work.push((edge.to, EdgeOutcome::Pruned));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::executors::ExecutorRegistry;
    use crate::workflow::parse_document_value;
    use serde_json::json;
    use std::time::Duration;

    async fn run(doc: Value, registry: &ExecutorRegistry, input: Value) -> WorkflowState {
        let workflow = parse_document_value(doc).unwrap();
        let dag = compile(&workflow, registry).unwrap();
        Engine::new(dag).run(input).await
    }

    /// A python_code stand-in that dispatches on node id, plus a jq_transform
    /// stand-in implementing the `(.a // .b)` pick used by branch joins.
    fn arithmetic_registry() -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        registry.register_fn("python_code", |input, ctx| async move {
            let num = |k: &str| input.get(k).and_then(Value::as_i64).unwrap_or(0);
            match ctx.node_id.as_str() {
                "sum" => Ok(json!({"value": num("x") + num("y")})),
                "do_add" => Ok(json!({"value": num("x") + num("y")})),
                "do_sub" => Ok(json!({"value": num("x") - num("y")})),
                "f1" => Ok(json!({"n": 1})),
                "f2" => Ok(json!({"n": 2})),
                "f3" => Ok(json!({"n": 3})),
                "raiser" => Err(Error::Executor("deliberate failure".to_string())),
                "sleeper" => {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Ok(json!({"slept": true}))
                }
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(json!({"slept": true}))
                }
                other => Ok(json!({"echo": other})),
            }
        });
        registry.register_fn("jq_transform", |input, _ctx| async move {
            // `(.a // .b)` - first non-null of the two branch inputs.
            let a = input.get("a").cloned().unwrap_or(Value::Null);
            if a != Value::Null {
                Ok(a)
            } else {
                Ok(input.get("b").cloned().unwrap_or(Value::Null))
            }
        });
        registry
    }

    fn router_doc() -> Value {
        json!({
            "id": "router_wf",
            "version": 1,
            "output": {
                "input_mapping": {"result": "$nodes.merge"},
                "schema": {"type": "object"},
            },
            "nodes": [
                {"id": "route_op", "kind": "router", "cases": {
                    "add": "$input.op == 'add'",
                    "sub": "$input.op == 'sub'",
                }},
                {"id": "do_add", "kind": "python_code",
                 "input_mapping": {"x": "$input.x", "y": "$input.y"},
                 "code": "return {\"value\": input[\"x\"] + input[\"y\"]}",
                 "output_mapping": {"value": "$.value"}},
                {"id": "do_sub", "kind": "python_code",
                 "input_mapping": {"x": "$input.x", "y": "$input.y"},
                 "code": "return {\"value\": input[\"x\"] - input[\"y\"]}",
                 "output_mapping": {"value": "$.value"}},
                {"id": "merge", "kind": "jq_transform",
                 "input_mapping": {"a": "$nodes.do_add", "b": "$nodes.do_sub"},
                 "code": "(.a // .b)"},
            ],
            "edges": [
                {"from": "start", "to": "route_op"},
                {"from": "route_op", "to": "do_add", "when_label": "add"},
                {"from": "route_op", "to": "do_sub", "when_label": "sub"},
                {"from": "do_add", "to": "merge"},
                {"from": "do_sub", "to": "merge"},
                {"from": "merge", "to": "end"},
            ],
        })
    }

    #[tokio::test]
    async fn test_linear_pipeline() {
        let doc = json!({
            "id": "sum_wf",
            "version": 1,
            "output": {
                "input_mapping": {"sum": "$nodes.sum.value"},
                "schema": {"type": "object", "properties": {"sum": {"type": "number"}}},
            },
            "nodes": [
                {"id": "sum", "kind": "python_code",
                 "input_mapping": {"x": "$input.x", "y": "$input.y"},
                 "code": "return {\"value\": input[\"x\"] + input[\"y\"]}"},
            ],
            "edges": [
                {"from": "start", "to": "sum"},
                {"from": "sum", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({"x": 10, "y": 20})).await;
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert_eq!(state.output, Some(json!({"sum": 30})));
        assert_eq!(state.data["sum"], json!({"value": 30}));
    }

    #[tokio::test]
    async fn test_router_branch_with_join() {
        let state = run(
            router_doc(),
            &arithmetic_registry(),
            json!({"op": "add", "x": 3, "y": 4}),
        )
        .await;

        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert_eq!(state.router_labels["route_op"], "add");
        assert_eq!(state.data["route_op"], json!({"label": "add"}));
        assert_eq!(state.data["do_add"], json!({"value": 7}));
        // The untaken branch is skipped: no data entry, no error.
        assert!(!state.data.contains_key("do_sub"));
        // The non-strict join saw {"a": <add>, "b": null} and picked a.
        assert_eq!(state.data["merge"], json!({"value": 7}));
        assert_eq!(state.output, Some(json!({"result": {"value": 7}})));
    }

    #[tokio::test]
    async fn test_router_other_branch() {
        let state = run(
            router_doc(),
            &arithmetic_registry(),
            json!({"op": "sub", "x": 3, "y": 4}),
        )
        .await;

        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert_eq!(state.router_labels["route_op"], "sub");
        assert!(!state.data.contains_key("do_add"));
        assert_eq!(state.data["merge"], json!({"value": -1}));
    }

    #[tokio::test]
    async fn test_fan_out_fan_in() {
        let doc = json!({
            "id": "fan_wf",
            "version": 1,
            "output": {
                "input_mapping": {"joined": "$nodes.join"},
                "schema": {"type": "object"},
            },
            "nodes": [
                {"id": "f1", "kind": "python_code", "code": "return {\"n\": 1}"},
                {"id": "f2", "kind": "python_code", "code": "return {\"n\": 2}"},
                {"id": "f3", "kind": "python_code", "code": "return {\"n\": 3}"},
                {"id": "join", "kind": "noop",
                 "input_mapping": {"a": "$nodes.f1", "b": "$nodes.f2", "c": "$nodes.f3"}},
            ],
            "edges": [
                {"from": "start", "to": "f1"},
                {"from": "start", "to": "f2"},
                {"from": "start", "to": "f3"},
                {"from": "f1", "to": "join"},
                {"from": "f2", "to": "join"},
                {"from": "f3", "to": "join"},
                {"from": "join", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({})).await;
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        // The join waited for all three upstreams; strict resolution proves
        // each had published before the join resolved its inputs.
        assert_eq!(
            state.data["join"],
            json!({"a": {"n": 1}, "b": {"n": 2}, "c": {"n": 3}})
        );
    }

    #[tokio::test]
    async fn test_fail_fast_halt() {
        let doc = json!({
            "id": "failfast_wf",
            "version": 1,
            "output": {"input_mapping": {"ok": true}, "schema": {"type": "object"}},
            "nodes": [
                {"id": "sleeper", "kind": "python_code", "code": "sleep"},
                {"id": "raiser", "kind": "python_code", "code": "raise"},
                {"id": "after", "kind": "noop",
                 "input_mapping": {"s": "$nodes.sleeper"}},
            ],
            "edges": [
                {"from": "start", "to": "sleeper"},
                {"from": "start", "to": "raiser"},
                {"from": "sleeper", "to": "after"},
                {"from": "raiser", "to": "after"},
                {"from": "after", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({})).await;
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].node_id, "raiser");
        assert_eq!(state.errors[0].error_type, "EXECUTOR_ERROR");
        // Fail-fast: end never ran.
        assert!(state.output.is_none());
        // The raiser fails immediately, so the sleeper finishes after the
        // halt and its result is discarded.
        assert!(!state.data.contains_key("sleeper"));
        assert!(!state.data.contains_key("after"));
    }

    #[tokio::test]
    async fn test_fail_fast_false_continues() {
        let doc = json!({
            "id": "lenient_wf",
            "version": 1,
            "fail_fast": false,
            "output": {
                "input_mapping": {"good": "$nodes.good.echo"},
                "schema": {"type": "object"},
            },
            "nodes": [
                {"id": "raiser", "kind": "python_code", "code": "raise"},
                {"id": "needs_raiser", "kind": "noop",
                 "input_mapping": {"r": "$nodes.raiser.value"}},
                {"id": "good", "kind": "python_code", "code": "echo"},
            ],
            "edges": [
                {"from": "start", "to": "raiser"},
                {"from": "start", "to": "good"},
                {"from": "raiser", "to": "needs_raiser"},
                {"from": "good", "to": "end"},
                {"from": "needs_raiser", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({})).await;
        // The raiser failed, and the node strictly referencing its missing
        // output failed in turn.
        let types: Vec<&str> = state.errors.iter().map(|e| e.error_type.as_str()).collect();
        assert!(types.contains(&"EXECUTOR_ERROR"), "{types:?}");
        assert!(types.contains(&"REFERENCE_ERROR"), "{types:?}");
        // The healthy branch completed and end still computed the output.
        assert_eq!(state.data["good"], json!({"echo": "good"}));
        assert_eq!(state.output, Some(json!({"good": "good"})));
    }

    #[tokio::test]
    async fn test_strict_missing_input_reference() {
        let doc = json!({
            "id": "strict_wf",
            "version": 1,
            "output": {"input_mapping": {}, "schema": {"type": "object"}},
            "nodes": [
                {"id": "n", "kind": "noop", "input_mapping": {"v": "$input.missing"}},
            ],
            "edges": [
                {"from": "start", "to": "n"},
                {"from": "n", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({})).await;
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].error_type, "REFERENCE_ERROR");
        assert!(state.output.is_none());
        assert!(!state.data.contains_key("n"));
    }

    #[tokio::test]
    async fn test_node_timeout() {
        let doc = json!({
            "id": "timeout_wf",
            "version": 1,
            "output": {"input_mapping": {}, "schema": {"type": "object"}},
            "nodes": [
                {"id": "slow", "kind": "python_code", "code": "sleep", "timeout_s": 0.05},
            ],
            "edges": [
                {"from": "start", "to": "slow"},
                {"from": "slow", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({})).await;
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].error_type, "TIMEOUT_ERROR");
        assert!(!state.data.contains_key("slow"));
    }

    #[tokio::test]
    async fn test_router_default_label() {
        let doc = json!({
            "id": "default_wf",
            "version": 1,
            "output": {"input_mapping": {}, "schema": {"type": "object"}},
            "nodes": [
                {"id": "route", "kind": "router",
                 "cases": {"hot": "$input.temp > 100"},
                 "default": "cold"},
                {"id": "hot_path", "kind": "noop"},
                {"id": "cold_path", "kind": "noop"},
            ],
            "edges": [
                {"from": "start", "to": "route"},
                {"from": "route", "to": "hot_path", "when_label": "hot"},
                {"from": "route", "to": "cold_path", "when_label": "cold"},
                {"from": "hot_path", "to": "end"},
                {"from": "cold_path", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({"temp": 20})).await;
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert_eq!(state.router_labels["route"], "cold");
        assert!(state.data.contains_key("cold_path"));
        assert!(!state.data.contains_key("hot_path"));
        assert!(state.output.is_some());
    }

    #[tokio::test]
    async fn test_router_no_match_fails() {
        let doc = json!({
            "id": "nomatch_wf",
            "version": 1,
            "output": {"input_mapping": {}, "schema": {"type": "object"}},
            "nodes": [
                {"id": "route", "kind": "router", "cases": {"hot": "$input.temp > 100"}},
                {"id": "hot_path", "kind": "noop"},
            ],
            "edges": [
                {"from": "start", "to": "route"},
                {"from": "route", "to": "hot_path", "when_label": "hot"},
                {"from": "hot_path", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({"temp": 20})).await;
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].error_type, "ROUTER_NO_MATCH");
        assert!(state.output.is_none());
        assert!(state.router_labels.is_empty());
    }

    #[tokio::test]
    async fn test_router_condition_error_is_false() {
        let doc = json!({
            "id": "condfalse_wf",
            "version": 1,
            "output": {"input_mapping": {}, "schema": {"type": "object"}},
            "nodes": [
                // Ordering a string against a number errors; the case is
                // treated as false and the else case matches.
                {"id": "route", "kind": "router", "cases": {
                    "broken": "$input.label < 3",
                    "fallback": "else",
                }},
                {"id": "a", "kind": "noop"},
                {"id": "b", "kind": "noop"},
            ],
            "edges": [
                {"from": "start", "to": "route"},
                {"from": "route", "to": "a", "when_label": "broken"},
                {"from": "route", "to": "b", "when_label": "fallback"},
                {"from": "a", "to": "end"},
                {"from": "b", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({"label": "oops"})).await;
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert_eq!(state.router_labels["route"], "fallback");
    }

    #[tokio::test]
    async fn test_skip_propagates_transitively() {
        let doc = json!({
            "id": "skipchain_wf",
            "version": 1,
            "output": {
                "input_mapping": {"v": "$nodes.merge"},
                "schema": {"type": "object"},
            },
            "nodes": [
                {"id": "route", "kind": "router",
                 "cases": {"a": "$input.pick == 'a'", "b": "else"}},
                {"id": "n_a", "kind": "python_code", "code": "echo"},
                {"id": "b1", "kind": "python_code", "code": "echo"},
                {"id": "b2", "kind": "python_code", "code": "echo",
                 "input_mapping": {"v": "$nodes.b1"}},
                {"id": "merge", "kind": "jq_transform",
                 "input_mapping": {"a": "$nodes.n_a", "b": "$nodes.b2"}},
            ],
            "edges": [
                {"from": "start", "to": "route"},
                {"from": "route", "to": "n_a", "when_label": "a"},
                {"from": "route", "to": "b1", "when_label": "b"},
                {"from": "b1", "to": "b2"},
                {"from": "n_a", "to": "merge"},
                {"from": "b2", "to": "merge"},
                {"from": "merge", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({"pick": "a"})).await;
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        // The whole b-chain is skipped, not just the first node.
        assert!(!state.data.contains_key("b1"));
        assert!(!state.data.contains_key("b2"));
        assert_eq!(state.data["merge"], json!({"echo": "n_a"}));
    }

    #[tokio::test]
    async fn test_same_label_fans_out_to_all_targets() {
        let doc = json!({
            "id": "samelabel_wf",
            "version": 1,
            "output": {"input_mapping": {}, "schema": {"type": "object"}},
            "nodes": [
                {"id": "route", "kind": "router", "cases": {"go": "else"}},
                {"id": "t1", "kind": "noop"},
                {"id": "t2", "kind": "noop"},
            ],
            "edges": [
                {"from": "start", "to": "route"},
                {"from": "route", "to": "t1", "when_label": "go"},
                {"from": "route", "to": "t2", "when_label": "go"},
                {"from": "t1", "to": "end"},
                {"from": "t2", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({})).await;
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert!(state.data.contains_key("t1"));
        assert!(state.data.contains_key("t2"));
    }

    #[tokio::test]
    async fn test_end_strict_reference_to_skipped_node_fails() {
        let mut doc = router_doc();
        doc["output"]["input_mapping"] = json!({"v": "$nodes.do_sub.value"});

        let state = run(doc, &arithmetic_registry(), json!({"op": "add", "x": 1, "y": 1})).await;
        assert!(state.output.is_none());
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].node_id, "end");
        assert_eq!(state.errors[0].error_type, "REFERENCE_ERROR");
    }

    #[tokio::test]
    async fn test_output_schema_mismatch() {
        let doc = json!({
            "id": "badout_wf",
            "version": 1,
            "output": {
                "input_mapping": {"sum": "$nodes.sum.value"},
                "schema": {
                    "type": "object",
                    "properties": {"sum": {"type": "string"}},
                    "required": ["sum"],
                },
            },
            "nodes": [
                {"id": "sum", "kind": "python_code",
                 "input_mapping": {"x": "$input.x", "y": "$input.y"},
                 "code": "sum"},
            ],
            "edges": [
                {"from": "start", "to": "sum"},
                {"from": "sum", "to": "end"},
            ],
        });

        let state = run(doc, &arithmetic_registry(), json!({"x": 1, "y": 2})).await;
        assert!(state.output.is_none());
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].error_type, "OUTPUT_SCHEMA_ERROR");
    }

    #[tokio::test]
    async fn test_noop_publishes_resolved_inputs_exactly() {
        let doc = json!({
            "id": "noop_wf",
            "version": 1,
            "output": {"input_mapping": {"x": "$nodes.step_one.x"}, "schema": {"type": "object"}},
            "nodes": [
                {"id": "step_one", "kind": "noop",
                 "input_mapping": {"x": "$input.x", "fixed": 5}},
            ],
            "edges": [
                {"from": "start", "to": "step_one"},
                {"from": "step_one", "to": "end"},
            ],
        });

        let state = run(doc, &ExecutorRegistry::new(), json!({"x": 123, "y": "ignored"})).await;
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert_eq!(state.data["step_one"], json!({"x": 123, "fixed": 5}));
        assert_eq!(state.last_node.as_deref(), Some("end"));
        assert_eq!(state.output, Some(json!({"x": 123})));
    }

    #[tokio::test]
    async fn test_empty_workflow_start_to_end() {
        let doc = json!({
            "id": "empty_wf",
            "version": 1,
            "output": {"input_mapping": {"x": "$input.x"}, "schema": {"type": "object"}},
            "nodes": [],
            "edges": [{"from": "start", "to": "end"}],
        });

        let state = run(doc, &ExecutorRegistry::new(), json!({"x": 123})).await;
        assert!(state.errors.is_empty());
        assert!(state.data.is_empty());
        assert_eq!(state.output, Some(json!({"x": 123})));
    }

    #[tokio::test]
    async fn test_data_contains_only_declared_ids() {
        let state = run(
            router_doc(),
            &arithmetic_registry(),
            json!({"op": "add", "x": 1, "y": 2}),
        )
        .await;
        let declared = ["route_op", "do_add", "do_sub", "merge"];
        for id in state.data.keys() {
            assert!(declared.contains(&id.as_str()), "unexpected data key {id}");
        }
    }

    #[tokio::test]
    async fn test_deterministic_output_across_runs() {
        let registry = arithmetic_registry();
        let input = json!({"op": "add", "x": 8, "y": 9});
        let first = run(router_doc(), &registry, input.clone()).await;
        let second = run(router_doc(), &registry, input).await;
        assert_eq!(first.output, second.output);
        assert_eq!(first.router_labels, second.router_labels);
    }
}
