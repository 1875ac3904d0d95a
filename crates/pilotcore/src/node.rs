use crate::{ContextSnapshot, LogEntry, NodeError, NodeKind, NodeSpec, RunId, Usage, Value, Variables};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Uniform execution contract for every node kind
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The node kind this handler serves
    fn kind(&self) -> NodeKind;

    /// Execute the node against a snapshot of the run context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: Validate node configuration before a run starts
    fn validate_config(&self, _node: &NodeSpec) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: Describe the handler (description, outputs)
    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata::default()
    }
}

/// Everything a handler may read while executing one node
#[derive(Clone)]
pub struct NodeContext {
    pub run_id: RunId,

    /// The node being executed
    pub node: Arc<NodeSpec>,

    /// Context variables as of the moment the node started
    pub variables: ContextSnapshot,

    /// The run's initial input mapping
    pub input: Arc<Variables>,

    /// Log handle; entries are appended to the run log after the node returns
    pub log: NodeLog,
}

impl NodeContext {
    pub fn new(
        run_id: RunId,
        node: NodeSpec,
        variables: ContextSnapshot,
        input: Arc<Variables>,
    ) -> Self {
        let log = NodeLog::new(node.id.clone());
        Self {
            run_id,
            node: Arc::new(node),
            variables,
            input,
            log,
        }
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.node
            .config
            .get(name)
            .ok_or_else(|| NodeError::MissingConfig(name.to_string()))
    }

    /// Get a string config value or return error
    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        self.require_config(name)?
            .as_str()
            .ok_or_else(|| NodeError::invalid_config(name, "expected a string"))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.node.config.get(name).cloned().unwrap_or(default)
    }

    /// Render a template against the snapshot, logging unresolved names
    pub fn render(&self, template: &str) -> String {
        let rendered = self.variables.render(template);
        for name in &rendered.missing {
            tracing::warn!(node_id = %self.node.id, variable = %name, "unresolved template variable");
            self.log
                .warn(format!("unresolved template variable '{}'", name));
        }
        rendered.text
    }
}

/// Per-node log sink shared between a handler and the executor
#[derive(Debug, Clone)]
pub struct NodeLog {
    node_id: String,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl NodeLog {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogEntry::info(Some(self.node_id.clone()), message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogEntry::warn(Some(self.node_id.clone()), message));
    }

    /// Take every entry recorded so far
    pub fn drain(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn push(&self, entry: LogEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output port values, merged into the run context
    pub outputs: Variables,

    /// Tokens and cost spent by this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Branch label chosen by a condition node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Values copied into the run's final output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<Variables>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_outputs(mut self, outputs: Variables) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_capture(mut self, capture: Variables) -> Self {
        self.capture = Some(capture);
        self
    }
}

/// Metadata about a node handler
#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    pub description: String,
    pub category: String,
    pub outputs: Vec<PortDefinition>,
}

impl Default for HandlerMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}
