//! Executor contract and execution context.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::error::Result;

/// Best-effort cancellation broadcast.
///
/// The engine cancels once on fail-fast; executors observe the signal
/// cooperatively, either by polling [`CancelSignal::is_cancelled`] or by
/// awaiting [`CancelSignal::cancelled`] alongside their own work.
#[derive(Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation. Safe to call multiple times.
    pub fn cancel(&self) {
        let was_cancelled = self.cancelled.swap(true, Ordering::SeqCst);
        if !was_cancelled {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve when cancellation is requested. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Context passed to an executor for a single node execution.
#[derive(Clone)]
pub struct ExecutorContext {
    /// Id of the node being executed.
    pub node_id: String,

    /// Kind-specific configuration from the document (e.g. `code`,
    /// `timeout_s`, `model`).
    pub config: Value,

    /// Run-wide cancellation signal.
    pub cancel: CancelSignal,
}

/// A pluggable node backend.
///
/// Executors receive the resolved input object and must return a
/// JSON-serializable result; domain work (HTTP, sandboxes, LLMs) lives
/// entirely behind this trait.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The node kind this executor handles (e.g. "python_code").
    fn kind(&self) -> &str;

    /// Execute with resolved inputs and kind-specific config.
    async fn execute(&self, input: Value, ctx: &ExecutorContext) -> Result<Value>;
}

type BoxedExecutorFn =
    dyn Fn(Value, ExecutorContext) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        + Send
        + Sync;

/// An [`Executor`] built from an async closure.
///
/// Handy for embedders binding small backends and for tests standing in for
/// the out-of-scope executors.
pub struct FnExecutor {
    kind: String,
    func: Box<BoxedExecutorFn>,
}

impl FnExecutor {
    pub fn new<F, Fut>(kind: &str, func: F) -> Self
    where
        F: Fn(Value, ExecutorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            kind: kind.to_string(),
            func: Box::new(move |input, ctx| Box::pin(func(input, ctx))),
        }
    }
}

#[async_trait]
impl Executor for FnExecutor {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, input: Value, ctx: &ExecutorContext) -> Result<Value> {
        (self.func)(input, ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_cancel_signal() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());

        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        signal.cancel();
        assert!(signal.is_cancelled());
        assert!(handle.await.unwrap());

        // Awaiting after the fact resolves immediately.
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn test_fn_executor() {
        let exec = FnExecutor::new("double", |input, _ctx| async move {
            let x = input["x"].as_i64().unwrap_or(0);
            Ok(json!({"x2": x * 2}))
        });
        assert_eq!(exec.kind(), "double");

        let ctx = ExecutorContext {
            node_id: "n".into(),
            config: json!({}),
            cancel: CancelSignal::new(),
        };
        let out = exec.execute(json!({"x": 21}), &ctx).await.unwrap();
        assert_eq!(out, json!({"x2": 42}));
    }
}
