//! wfrun - a compiler and executor for declarative workflow graphs.
//!
//! Workflows are YAML/JSON documents describing a directed graph of nodes.
//! wfrun validates the document, compiles it into a schedulable DAG with
//! implicit `start` and `end` nodes, resolves dataflow between nodes through
//! a small `$...` reference language, evaluates router branches with a
//! restricted expression language, and executes the graph with fan-out,
//! fan-in, and a fail-fast error policy.
//!
//! Domain work (HTTP, sandboxed code, LLMs, tools) lives behind the
//! [`executors::Executor`] trait; the crate ships the `noop` executor and a
//! closure adapter, and embedders register the rest.
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use wfrun::{parse_document, ExecutorRegistry, Runtime};
//!
//! # async fn example() -> wfrun::Result<()> {
//! let workflow = parse_document(r#"
//! id: double_it
//! version: 1
//! nodes:
//!   - id: double
//!     kind: noop
//!     input_mapping: { x: $input.x }
//! edges:
//!   - { from: start, to: double }
//!   - { from: double, to: end }
//! output:
//!   input_mapping: { x: $nodes.double.x }
//!   schema: { type: object }
//! "#)?;
//!
//! let runtime = Runtime::new(ExecutorRegistry::new());
//! let report = runtime.invoke(&workflow, json!({"x": 21})).await?;
//! assert_eq!(report.output, Some(json!({"x": 21})));
//! # Ok(())
//! # }
//! ```

pub mod compiler;
pub mod engine;
pub mod error;
pub mod executors;
pub mod runtime;
pub mod validation;
pub mod workflow;

pub use engine::{Engine, ErrorRecord, WorkflowState};
pub use error::{Error, Result};
pub use executors::{CancelSignal, Executor, ExecutorContext, ExecutorRegistry, FnExecutor};
pub use runtime::{RunReport, RunStatus, Runtime};
pub use workflow::{
    parse_document, parse_document_file, parse_document_value, ValidationIssue, ValidationReport,
    Workflow,
};
