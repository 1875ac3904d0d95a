use serde::Serialize;
use std::fmt;

/// A single reason a workflow cannot be executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    MissingStart,
    MultipleStarts { node_ids: Vec<String> },
    StartHasIncoming { node_id: String },
    DuplicateNode { node_id: String },
    DanglingEdge { source: String, target: String, missing: String },
    Cycle { node_ids: Vec<String> },
    Unreachable { node_id: String },
    InvalidConfig { node_id: String, reason: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingStart => f.write_str("workflow has no start node"),
            Violation::MultipleStarts { node_ids } => write!(
                f,
                "workflow must have exactly one start node, found {}: {}",
                node_ids.len(),
                node_ids.join(", ")
            ),
            Violation::StartHasIncoming { node_id } => {
                write!(f, "start node '{}' must not have incoming edges", node_id)
            }
            Violation::DuplicateNode { node_id } => {
                write!(f, "node id '{}' is used more than once", node_id)
            }
            Violation::DanglingEdge {
                source,
                target,
                missing,
            } => write!(
                f,
                "edge {} -> {} references unknown node '{}'",
                source, target, missing
            ),
            Violation::Cycle { node_ids } => {
                write!(f, "cycle detected between nodes: {}", node_ids.join(", "))
            }
            Violation::Unreachable { node_id } => {
                write!(f, "node '{}' is not reachable from the start node", node_id)
            }
            Violation::InvalidConfig { node_id, reason } => {
                write!(f, "node '{}' has invalid config: {}", node_id, reason)
            }
        }
    }
}

/// Outcome of validating a workflow; empty means executable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn has_cycle(&self) -> bool {
        self.violations
            .iter()
            .any(|v| matches!(v, Violation::Cycle { .. }))
    }

    /// Human-readable messages, one per violation
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join("; "))
    }
}
