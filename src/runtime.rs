//! Invocation surface: validate and invoke workflow documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::compiler::compile;
use crate::engine::{Engine, ErrorRecord};
use crate::error::{Error, Result};
use crate::executors::ExecutorRegistry;
use crate::workflow::{validate_workflow, ValidationReport, Workflow};

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of a single invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    /// Final output; unset when the run failed before the end node.
    pub output: Option<Value>,
    /// Node-level errors in completion order.
    pub errors: Vec<ErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Compiles and executes workflows against a set of registered executors.
pub struct Runtime {
    registry: ExecutorRegistry,
}

impl Runtime {
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Run the validator only. Side-effect-free.
    pub fn validate(&self, workflow: &Workflow) -> ValidationReport {
        validate_workflow(workflow, &self.registry)
    }

    /// Validate, compile, and execute a workflow.
    ///
    /// Pre-execution problems (validation, compilation, input schema) fail
    /// with an error and no run is started. Node-level failures during the
    /// run are reported through [`RunReport::errors`].
    #[instrument(
        name = "workflow.invoke",
        skip(self, workflow, input),
        fields(workflow_id = %workflow.id, run_id = tracing::field::Empty)
    )]
    pub async fn invoke(&self, workflow: &Workflow, input: Value) -> Result<RunReport> {
        let report = self.validate(workflow);
        if !report.ok {
            return Err(Error::Validation(report.summary()));
        }

        let dag = compile(workflow, &self.registry)?;

        dag.input_schema.check(&input)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());
        let started_at = Utc::now();
        info!("Starting run {run_id} of workflow '{}'", workflow.id);

        let state = Engine::new(dag).run(input).await;

        let status = if state.errors.is_empty() && state.output.is_some() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        let finished_at = Utc::now();
        info!(
            "Run {run_id} {status} ({}ms)",
            (finished_at - started_at).num_milliseconds()
        );

        Ok(RunReport {
            run_id,
            workflow_id: workflow.id.clone(),
            status,
            output: state.output,
            errors: state.errors,
            started_at,
            finished_at,
        })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(ExecutorRegistry::new())
    }
}
