//! Executor registry - maps node kinds to executors.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::noop::NoopExecutor;
use super::types::{Executor, ExecutorContext, FnExecutor};
use crate::error::Result;

/// Registry of executors keyed by node kind.
///
/// The `router` kind never appears here: routers are orchestrated by the
/// engine itself. A document using a kind with no registered executor fails
/// at compile time.
#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create a registry with the built-in `noop` executor.
    pub fn new() -> Self {
        let mut registry = Self {
            executors: HashMap::new(),
        };
        registry.register(Arc::new(NoopExecutor::new()));
        registry
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its kind.
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.executors
            .insert(executor.kind().to_string(), executor);
    }

    /// Register an async closure as the executor for a kind.
    pub fn register_fn<F, Fut>(&mut self, kind: &str, func: F)
    where
        F: Fn(Value, ExecutorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(Arc::new(FnExecutor::new(kind, func)));
    }

    /// Get the executor for a kind.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(kind).cloned()
    }

    /// Whether a kind is registered.
    pub fn has(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    /// List registered kinds.
    pub fn kinds(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
