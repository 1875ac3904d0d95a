use async_trait::async_trait;
use pilotcore::{
    HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, PortDefinition,
};

/// Entry node: exposes the run input as its outputs
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Start
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.log
            .info(format!("Workflow started with {} input value(s)", ctx.input.len()));
        Ok(NodeOutput::new().with_outputs((*ctx.input).clone()))
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Entry point; outputs the run input".to_string(),
            category: "flow".to_string(),
            outputs: vec![PortDefinition::new("*", "One output per input variable")],
        }
    }
}
