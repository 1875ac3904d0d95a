use async_trait::async_trait;
use pilotcore::services::{CompletionRequest, CompletionService};
use pilotcore::{
    HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, NodeSpec,
    PortDefinition, Usage, Value,
};
use std::sync::Arc;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u64 = 1000;

/// Calls the completion service with a rendered prompt
pub struct ModelCallHandler {
    service: Arc<dyn CompletionService>,
}

impl ModelCallHandler {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl NodeHandler for ModelCallHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::ModelCall
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let prompt = ctx.render(ctx.require_str("prompt")?);
        let system_prompt = ctx.node.config_str("system_prompt").map(|s| ctx.render(s));
        let model = ctx
            .node
            .config_str("model")
            .unwrap_or(DEFAULT_MODEL)
            .to_string();
        let temperature = ctx.node.config_f64("temperature").unwrap_or(DEFAULT_TEMPERATURE);
        let max_tokens = ctx
            .node
            .config
            .get("max_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let response = self
            .service
            .complete(CompletionRequest {
                model: model.clone(),
                prompt,
                system_prompt,
                temperature: temperature as f32,
                max_tokens: max_tokens.min(u32::MAX as u64) as u32,
            })
            .await
            .map_err(|e| e.into_node_error("completion"))?;

        ctx.log.info(format!(
            "Model call completed with {} ({} tokens, ${:.6})",
            response.model.as_deref().unwrap_or(&model),
            response.tokens_used,
            response.cost
        ));

        Ok(NodeOutput::new()
            .with_output("output", response.text.as_str())
            .with_output("text", response.text)
            .with_output("model", response.model.unwrap_or(model))
            .with_usage(Usage::new(response.tokens_used, response.cost)))
    }

    fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
        match node.config.get("prompt") {
            Some(Value::String(_)) => {}
            Some(_) => return Err(NodeError::invalid_config("prompt", "expected a string")),
            None => return Err(NodeError::MissingConfig("prompt".to_string())),
        }
        if let Some(t) = node.config_f64("temperature") {
            if !(0.0..=2.0).contains(&t) {
                return Err(NodeError::invalid_config("temperature", "must be between 0 and 2"));
            }
        }
        Ok(())
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Call a language model with a templated prompt".to_string(),
            category: "ai".to_string(),
            outputs: vec![
                PortDefinition::new("output", "Completion text"),
                PortDefinition::new("text", "Completion text"),
                PortDefinition::new("model", "Model that answered"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::EchoCompletionService;
    use pilotcore::{ContextSnapshot, Variables};

    #[tokio::test]
    async fn renders_prompt_and_reports_usage() {
        let handler = ModelCallHandler::new(Arc::new(EchoCompletionService::new()));
        let node = NodeSpec::new("llm", NodeKind::ModelCall)
            .with_config("prompt", "Summarize {{topic}} briefly");
        let vars = Variables::from([("topic".to_string(), Value::from("tides"))]);
        let ctx = NodeContext::new(
            "run".into(),
            node,
            ContextSnapshot::from_variables(vars),
            Arc::new(Variables::new()),
        );

        let output = handler.execute(ctx).await.unwrap();
        assert_eq!(output.outputs["text"], Value::from("Summarize tides briefly"));
        assert_eq!(output.outputs["model"], Value::from(DEFAULT_MODEL));
        assert_eq!(output.usage, Some(Usage::new(3, 0.0)));
    }

    #[test]
    fn prompt_is_required() {
        let handler = ModelCallHandler::new(Arc::new(EchoCompletionService::new()));
        let node = NodeSpec::new("llm", NodeKind::ModelCall);
        assert_eq!(
            handler.validate_config(&node),
            Err(NodeError::MissingConfig("prompt".to_string()))
        );
        let node = node.with_config("prompt", "x").with_config("temperature", 3.0);
        assert!(handler.validate_config(&node).is_err());
    }
}
