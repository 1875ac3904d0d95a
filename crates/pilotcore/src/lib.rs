//! Core abstractions for the workflow engine
//!
//! This crate provides the graph model, the per-run execution context, the
//! event model and the contracts handlers and collaborators implement. It
//! contains no scheduling logic; see `pilotruntime` for the executor.

mod context;
mod error;
pub mod events;
mod node;
mod run;
pub mod services;
pub mod template;
mod validation;
mod value;
mod workflow;

pub use context::{ContextSnapshot, ExecutionContext, LogEntry, LogLevel, Usage};
pub use error::{CollaboratorError, FlowError, NodeError, WorkflowError};
pub use events::*;
pub use node::{HandlerMetadata, NodeContext, NodeHandler, NodeLog, NodeOutput, PortDefinition};
pub use run::{new_run_id, Run, RunId, RunReport, RunStatus};
pub use validation::{ValidationReport, Violation};
pub use value::{Value, Variables};
pub use workflow::{
    Edge, NodeId, NodeKind, NodeSpec, Position, Variable, VariableDirection, VariableType,
    Workflow, WorkflowId,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
