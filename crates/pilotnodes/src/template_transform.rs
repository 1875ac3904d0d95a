use async_trait::async_trait;
use pilotcore::{
    HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, NodeSpec,
    PortDefinition,
};

/// Renders `template` against the run context into `output`
///
/// Unlike an output node, nothing is captured into the final run output.
pub struct TemplateTransformHandler;

#[async_trait]
impl NodeHandler for TemplateTransformHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::TemplateTransform
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let rendered = ctx.render(ctx.require_str("template")?);
        ctx.log.info(format!(
            "Template processed, output length: {} characters",
            rendered.chars().count()
        ));
        Ok(NodeOutput::new().with_output("output", rendered))
    }

    fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
        match node.config_str("template") {
            Some(t) if !t.is_empty() => Ok(()),
            _ => Err(NodeError::MissingConfig("template".to_string())),
        }
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Render a text template from context values".to_string(),
            category: "data".to_string(),
            outputs: vec![PortDefinition::new("output", "Rendered text")],
        }
    }
}
