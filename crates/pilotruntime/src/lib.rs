//! Workflow execution runtime
//!
//! This crate provides the execution engine: graph validation, execution
//! order resolution, the handler registry and the sequential executor, plus
//! a runtime that runs many workflows concurrently.

mod executor;
mod order;
mod registry;
mod runtime;
mod store;
mod validate;

pub use executor::{ExecutorConfig, RunRequest, WorkflowExecutor, TIMEOUT_OVERRIDE_KEY};
pub use order::resolve;
pub use registry::HandlerRegistry;
pub use runtime::{PilotRuntime, RunHandle, RuntimeConfig};
pub use store::{InMemoryRunStore, RunStore};
pub use validate::validate;
