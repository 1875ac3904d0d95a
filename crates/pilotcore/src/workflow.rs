use crate::{Value, Variables, WorkflowError};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type WorkflowId = String;
pub type NodeId = String;

/// Complete workflow definition
///
/// A workflow is read-only input to the engine: nothing in a run ever
/// mutates its nodes or edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "generate_id")]
    pub id: WorkflowId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

fn generate_id() -> WorkflowId {
    Uuid::new_v4().to_string()
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            variables: Vec::new(),
        }
    }

    /// Parse a workflow from JSON; unknown node kinds are rejected here
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(json).map_err(|e| WorkflowError::Parse(e.to_string()))
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        self.edges.push(Edge::new(source, target));
    }

    /// Connect a labelled output (e.g. a condition branch) to a target node
    pub fn connect_handle(
        &mut self,
        source: impl Into<NodeId>,
        source_handle: impl Into<String>,
        target: impl Into<NodeId>,
    ) {
        self.edges
            .push(Edge::new(source, target).with_source_handle(source_handle));
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn start_nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Start)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn input_variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables
            .iter()
            .filter(|v| v.direction == VariableDirection::Input)
    }

    pub fn output_variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables
            .iter()
            .filter(|v| v.direction == VariableDirection::Output)
    }
}

/// The closed set of node behaviours
///
/// Names used by older graph generators are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Start,
    #[serde(alias = "llm", alias = "chat")]
    ModelCall,
    #[serde(alias = "if-else")]
    Condition,
    Code,
    HttpRequest,
    #[serde(alias = "variable-assigner")]
    VariableSet,
    #[serde(alias = "template")]
    TemplateTransform,
    #[serde(alias = "answer", alias = "end")]
    Output,
}

impl NodeKind {
    pub const ALL: [NodeKind; 8] = [
        NodeKind::Start,
        NodeKind::ModelCall,
        NodeKind::Condition,
        NodeKind::Code,
        NodeKind::HttpRequest,
        NodeKind::VariableSet,
        NodeKind::TemplateTransform,
        NodeKind::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::ModelCall => "model-call",
            NodeKind::Condition => "condition",
            NodeKind::Code => "code",
            NodeKind::HttpRequest => "http-request",
            NodeKind::VariableSet => "variable-set",
            NodeKind::TemplateTransform => "template-transform",
            NodeKind::Output => "output",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(alias = "type")]
    pub kind: NodeKind,
    #[serde(default, alias = "title", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Variables::is_empty", alias = "data")]
    pub config: Variables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            display_name: None,
            config: Variables::new(),
            position: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    /// Display name, falling back to the id
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(Value::as_f64)
    }
}

/// Connection between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(alias = "sourceNodeId")]
    pub source: NodeId,
    #[serde(alias = "targetNodeId")]
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Declared workflow variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    #[serde(alias = "variable")]
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default)]
    pub direction: VariableDirection,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Variable {
    pub fn input(name: impl Into<String>, var_type: VariableType) -> Self {
        Self {
            name: name.into(),
            var_type,
            direction: VariableDirection::Input,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn output(name: impl Into<String>, var_type: VariableType) -> Self {
        Self {
            direction: VariableDirection::Output,
            ..Self::input(name, var_type)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    #[serde(alias = "paragraph", alias = "select")]
    Text,
    Number,
    Boolean,
    Object,
    Array,
    File,
    Any,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableDirection {
    #[default]
    Input,
    Output,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_generator_aliases() {
        let json = r#"{
            "name": "chatbot",
            "nodes": [
                {"id": "start", "type": "start", "title": "Start"},
                {"id": "chat", "type": "llm", "config": {"prompt": "{{query}}"}},
                {"id": "answer", "type": "answer"}
            ],
            "edges": [
                {"source": "start", "target": "chat"},
                {"sourceNodeId": "chat", "targetNodeId": "answer"}
            ],
            "variables": [{"variable": "query", "type": "paragraph", "required": true}]
        }"#;

        let workflow = Workflow::from_json(json).unwrap();
        assert_eq!(workflow.nodes[1].kind, NodeKind::ModelCall);
        assert_eq!(workflow.nodes[2].kind, NodeKind::Output);
        assert_eq!(workflow.nodes[0].label(), "Start");
        assert_eq!(workflow.edges[1].source, "chat");
        assert_eq!(workflow.variables[0].var_type, VariableType::Text);
        assert!(!workflow.id.is_empty());
    }

    #[test]
    fn loads_template_transform_nodes() {
        let json = r#"{
            "name": "greeter",
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "greet", "type": "template-transform", "data": {"template": "hi {{q}}"}}
            ],
            "edges": [{"source": "start", "target": "greet"}]
        }"#;

        let workflow = Workflow::from_json(json).unwrap();
        let greet = workflow.find_node("greet").unwrap();
        assert_eq!(greet.kind, NodeKind::TemplateTransform);
        assert_eq!(greet.config_str("template"), Some("hi {{q}}"));
        assert_eq!(greet.kind.to_string(), "template-transform");
    }

    #[test]
    fn rejects_unknown_kind_at_load() {
        let json = r#"{"name": "x", "nodes": [{"id": "a", "kind": "teleport"}]}"#;
        assert!(matches!(
            Workflow::from_json(json),
            Err(WorkflowError::Parse(_))
        ));
    }

    #[test]
    fn builder_connects_branches() {
        let mut workflow = Workflow::new("branching");
        let start = workflow.add_node(NodeSpec::new("start", NodeKind::Start));
        let check = workflow.add_node(
            NodeSpec::new("check", NodeKind::Condition).with_config("expression", "score > 0.5"),
        );
        workflow.connect(&start, &check);
        workflow.connect_handle(&check, "true", "high");

        assert_eq!(workflow.outgoing("check").count(), 1);
        assert_eq!(
            workflow.incoming("high").next().and_then(|e| e.source_handle.as_deref()),
            Some("true")
        );
    }
}
