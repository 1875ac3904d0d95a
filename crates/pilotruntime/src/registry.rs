use pilotcore::{
    HandlerMetadata, NodeHandler, NodeKind, ValidationReport, Violation, Workflow, WorkflowError,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of node handlers, keyed by node kind
///
/// Built once at startup and shared read-only (behind an `Arc`) by every
/// concurrent run.
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler; a later registration for the same kind replaces
    /// the earlier one
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        let kind = handler.kind();
        tracing::info!("Registering node handler: {}", kind);
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds in declaration order
    pub fn kinds(&self) -> Vec<NodeKind> {
        let mut kinds: Vec<NodeKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn metadata(&self, kind: NodeKind) -> Option<HandlerMetadata> {
        self.handlers.get(&kind).map(|h| h.metadata())
    }

    /// Fail on the first node whose kind has no handler
    pub fn ensure_supported(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        match workflow.nodes.iter().find(|n| !self.contains(n.kind)) {
            Some(node) => Err(WorkflowError::UnknownNodeKind {
                kind: node.kind,
                node_id: node.id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Ask each handler to check the config of the nodes it will execute
    pub fn check_configs(&self, workflow: &Workflow) -> ValidationReport {
        let mut report = ValidationReport::default();
        for node in &workflow.nodes {
            if let Some(handler) = self.handlers.get(&node.kind) {
                if let Err(err) = handler.validate_config(node) {
                    report.push(Violation::InvalidConfig {
                        node_id: node.id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        report
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
