//! Pluggable node backends.
//!
//! The engine treats every node kind (other than `router`, which it
//! orchestrates itself) as an opaque [`Executor`]: resolved inputs go in, a
//! JSON result or an error comes out. Domain backends - HTTP clients,
//! sandboxes, LLMs, tool bridges - are bound by the embedder through the
//! [`ExecutorRegistry`].

mod noop;
mod registry;
mod types;

pub use noop::NoopExecutor;
pub use registry::ExecutorRegistry;
pub use types::{CancelSignal, Executor, ExecutorContext, FnExecutor};
