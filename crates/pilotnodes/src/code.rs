use async_trait::async_trait;
use pilotcore::services::{CodeEvaluator, CodeRequest};
use pilotcore::{
    HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, NodeSpec,
    PortDefinition, Value,
};
use std::sync::Arc;

pub const DEFAULT_LANGUAGE: &str = "python";

/// Hands a snippet and the current context to the code evaluator
pub struct CodeHandler {
    evaluator: Arc<dyn CodeEvaluator>,
}

impl CodeHandler {
    pub fn new(evaluator: Arc<dyn CodeEvaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl NodeHandler for CodeHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Code
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let code = ctx.require_str("code")?.to_string();
        let language = ctx
            .node
            .config_str("language")
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_string();

        let result = self
            .evaluator
            .evaluate(CodeRequest {
                language: language.clone(),
                code,
                context: ctx.variables.variables().clone(),
            })
            .await
            .map_err(|e| e.into_node_error("code"))?;

        let preview: String = result.render().chars().take(100).collect();
        ctx.log
            .info(format!("{} code executed, result: {}", language, preview));

        Ok(NodeOutput::new()
            .with_output("output", result.clone())
            .with_output("result", result))
    }

    fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
        match node.config.get("code") {
            Some(Value::String(code)) if !code.trim().is_empty() => Ok(()),
            Some(_) => Err(NodeError::invalid_config("code", "expected non-empty source text")),
            None => Err(NodeError::MissingConfig("code".to_string())),
        }
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Run a code snippet against the run context".to_string(),
            category: "transform".to_string(),
            outputs: vec![
                PortDefinition::new("output", "Value produced by the snippet"),
                PortDefinition::new("result", "Same as output"),
            ],
        }
    }
}
