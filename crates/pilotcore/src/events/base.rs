use crate::{NodeId, RunId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Lifecycle event types emitted during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStarted,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
}

impl EventKind {
    /// Exactly one terminal event closes every started run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::WorkflowCompleted | EventKind::WorkflowFailed | EventKind::WorkflowCancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WorkflowStarted => "workflow_started",
            EventKind::NodeStarted => "node_started",
            EventKind::NodeCompleted => "node_completed",
            EventKind::NodeFailed => "node_failed",
            EventKind::NodeSkipped => "node_skipped",
            EventKind::WorkflowCompleted => "workflow_completed",
            EventKind::WorkflowFailed => "workflow_failed",
            EventKind::WorkflowCancelled => "workflow_cancelled",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of run progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub id: Uuid,
    pub run_id: RunId,
    /// Position within the run, starting at 0
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub message: String,
    #[serde(default)]
    pub payload: Value,
    pub progress: f64,
    pub timestamp: DateTime<Utc>,
}

/// Writes a run's events, in order, to its history and to an optional
/// delivery channel
///
/// A bounded channel applies backpressure: `emit` waits until the
/// subscriber has room. If the subscriber goes away the run keeps going and
/// only the history is kept.
#[derive(Debug)]
pub struct EventEmitter {
    run_id: RunId,
    next_seq: u64,
    history: Vec<ExecutionEvent>,
    sender: Option<mpsc::Sender<ExecutionEvent>>,
}

impl EventEmitter {
    pub fn new(run_id: impl Into<RunId>, sender: Option<mpsc::Sender<ExecutionEvent>>) -> Self {
        Self {
            run_id: run_id.into(),
            next_seq: 0,
            history: Vec::new(),
            sender,
        }
    }

    /// Emit the next event of the run
    pub async fn emit(
        &mut self,
        kind: EventKind,
        node_id: Option<&str>,
        message: impl Into<String>,
        payload: Value,
        progress: f64,
    ) -> &ExecutionEvent {
        let event = ExecutionEvent {
            id: Uuid::new_v4(),
            run_id: self.run_id.clone(),
            seq: self.next_seq,
            kind,
            node_id: node_id.map(str::to_string),
            message: message.into(),
            payload,
            progress,
            timestamp: Utc::now(),
        };
        self.next_seq += 1;

        if let Some(sender) = &self.sender {
            if sender.send(event.clone()).await.is_err() {
                tracing::debug!(run_id = %self.run_id, "event subscriber dropped, keeping history only");
                self.sender = None;
            }
        }

        self.history.push(event);
        &self.history[self.history.len() - 1]
    }

    pub fn history(&self) -> &[ExecutionEvent] {
        &self.history
    }

    pub fn into_history(self) -> Vec<ExecutionEvent> {
        self.history
    }
}
