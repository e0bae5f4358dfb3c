//! The built-in noop executor.

use async_trait::async_trait;
use serde_json::Value;

use super::types::{Executor, ExecutorContext};
use crate::error::Result;

/// Returns the resolved inputs unchanged. Useful for renaming fields through
/// mappings and as a join point.
pub struct NoopExecutor;

impl NoopExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for NoopExecutor {
    fn kind(&self) -> &str {
        "noop"
    }

    async fn execute(&self, input: Value, _ctx: &ExecutorContext) -> Result<Value> {
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::CancelSignal;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_passes_input_through() {
        let ctx = ExecutorContext {
            node_id: "n".into(),
            config: json!({}),
            cancel: CancelSignal::new(),
        };
        let input = json!({"a": 1, "b": [true, null]});
        let out = NoopExecutor::new().execute(input.clone(), &ctx).await.unwrap();
        assert_eq!(out, input);
    }
}
