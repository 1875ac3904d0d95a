use crate::{NodeKind, RunStatus, ValidationReport};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Run store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Handler-level failure; always caught by the executor and turned into a
/// `node_failed` event
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required config: {0}")]
    MissingConfig(String),

    #[error("Invalid config for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("{service} failed: {message}")]
    Collaborator {
        service: String,
        message: String,
        retryable: bool,
    },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl NodeError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        NodeError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller could reasonably try the same node again
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::Collaborator { retryable, .. } => *retryable,
            NodeError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Errors raised before a run leaves `Pending`
#[derive(Error, Debug, Clone)]
pub enum WorkflowError {
    #[error("Invalid workflow: {0}")]
    Invalid(ValidationReport),

    #[error("Cyclic dependency detected")]
    CyclicGraph,

    #[error("No handler registered for node kind '{kind}' (node {node_id})")]
    UnknownNodeKind { kind: NodeKind, node_id: String },

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Failed to parse workflow: {0}")]
    Parse(String),
}

/// Failure reported by an outward collaborator (completion service, HTTP
/// client, code evaluator)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("not configured: {0}")]
    Unavailable(String),
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CollaboratorError::Network(_) | CollaboratorError::Timeout => true,
            CollaboratorError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Attribute the failure to a named service for the node error message
    pub fn into_node_error(self, service: &str) -> NodeError {
        NodeError::Collaborator {
            service: service.to_string(),
            retryable: self.is_retryable(),
            message: self.to_string(),
        }
    }
}
