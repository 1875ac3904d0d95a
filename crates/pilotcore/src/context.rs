use crate::template::{self, Rendered};
use crate::{NodeId, Value, Variables};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-run variable store threading values between nodes
///
/// Only the executor mutates it; handlers see a [`ContextSnapshot`].
#[derive(Debug)]
pub struct ExecutionContext {
    variables: Variables,
    logs: Vec<LogEntry>,
    usage: Usage,
    started: Instant,
}

impl ExecutionContext {
    /// Create a context with the run's input bound into it
    pub fn new(input: Variables) -> Self {
        Self {
            variables: input,
            logs: Vec::new(),
            usage: Usage::default(),
            started: Instant::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        template::lookup(&self.variables, name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Render `{{name}}` placeholders; unresolved ones stay literal and are
    /// recorded as warnings
    pub fn render_template(&mut self, template: &str) -> String {
        let Rendered { text, missing } = template::render(template, &self.variables);
        for name in missing {
            tracing::warn!(variable = %name, "unresolved template variable");
            self.log(LogEntry::warn(None, format!("unresolved template variable '{}'", name)));
        }
        text
    }

    /// Immutable copy handed to a handler
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            variables: Arc::new(self.variables.clone()),
        }
    }

    pub fn log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.logs)
    }

    pub fn record_usage(&mut self, usage: Usage) {
        self.usage += usage;
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Read-only view of the context at the moment a node starts
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    variables: Arc<Variables>,
}

impl ContextSnapshot {
    pub fn from_variables(variables: Variables) -> Self {
        Self {
            variables: Arc::new(variables),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        template::lookup(&self.variables, name)
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn render(&self, template: &str) -> Rendered {
        template::render(template, &self.variables)
    }
}

/// Token and cost counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub tokens: u64,
    pub cost: f64,
}

impl Usage {
    pub fn new(tokens: u64, cost: f64) -> Self {
        Self { tokens, cost }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.tokens += other.tokens;
        self.cost += other.cost;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
}

/// One line of the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn info(node_id: Option<NodeId>, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Info,
            node_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn warn(node_id: Option<NodeId>, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Warning,
            ..Self::info(node_id, message)
        }
    }
}
