use crate::{ExecutionEvent, FlowError, LogEntry, NodeId, Usage, Variables, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type RunId = String;

pub fn new_run_id() -> RunId {
    Uuid::new_v4().to_string()
}

/// Run lifecycle: `Pending -> Running -> {Completed, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Live state of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub workflow_id: WorkflowId,
    pub status: RunStatus,
    pub current_node_id: Option<NodeId>,
    pub progress: f64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(id: impl Into<RunId>, workflow_id: impl Into<WorkflowId>) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            status: RunStatus::Pending,
            current_node_id: None,
            progress: 0.0,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to `next`; terminal states are final
    pub fn transition(&mut self, next: RunStatus) -> Result<(), FlowError> {
        if !self.status.can_transition_to(next) {
            return Err(FlowError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match next {
            RunStatus::Running => self.started_at = Some(Utc::now()),
            _ if next.is_terminal() => {
                self.completed_at = Some(Utc::now());
                self.current_node_id = None;
            }
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn set_progress(&mut self, resolved: usize, total: usize) {
        self.progress = if total == 0 {
            1.0
        } else {
            (resolved as f64 / total as f64).clamp(0.0, 1.0)
        };
    }
}

/// Final result of a run, including its complete event history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub status: RunStatus,
    pub output: Variables,
    pub total_tokens_used: u64,
    pub total_cost: f64,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub events: Vec<ExecutionEvent>,
    pub logs: Vec<LogEntry>,
}

impl RunReport {
    pub fn usage(&self) -> Usage {
        Usage::new(self.total_tokens_used, self.total_cost)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotonic() {
        let mut run = Run::new("r", "wf");
        assert!(run.transition(RunStatus::Completed).is_err());
        run.transition(RunStatus::Running).unwrap();
        assert!(run.started_at.is_some());
        run.transition(RunStatus::Failed).unwrap();
        assert!(run.completed_at.is_some());

        let err = run.transition(RunStatus::Running).unwrap_err();
        assert!(matches!(
            err,
            FlowError::InvalidTransition {
                from: RunStatus::Failed,
                to: RunStatus::Running
            }
        ));
    }

    #[test]
    fn progress_is_clamped() {
        let mut run = Run::new("r", "wf");
        run.set_progress(1, 4);
        assert_eq!(run.progress, 0.25);
        run.set_progress(9, 4);
        assert_eq!(run.progress, 1.0);
    }
}
