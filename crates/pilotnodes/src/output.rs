use crate::resolve::reference_name;
use async_trait::async_trait;
use pilotcore::{
    HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, NodeSpec,
    PortDefinition, Value, Variables,
};

/// Context names tried, in order, when an output node has no config
const FALLBACK_NAMES: [&str; 3] = ["text", "output", "result"];

/// Collects values into the run's final output
///
/// * `values: ["a", "b"]` copies context values under their own names
/// * `values: {"answer": "llm.text"}` copies them under an alias
/// * `template: "..."` renders into `output`
/// * otherwise the most recent `text`, `output` or `result` becomes `output`
pub struct OutputHandler;

impl OutputHandler {
    fn collect(ctx: &NodeContext) -> Result<Variables, NodeError> {
        let mut captured = Variables::new();

        match ctx.node.config.get("values") {
            Some(Value::Array(names)) => {
                for name in names {
                    let name = name
                        .as_str()
                        .map(reference_name)
                        .ok_or_else(|| NodeError::invalid_config("values", "expected names"))?;
                    captured.insert(name.to_string(), Self::lookup(ctx, name));
                }
                return Ok(captured);
            }
            Some(Value::Object(aliases)) => {
                for (alias, source) in aliases {
                    let name = source.as_str().map(reference_name).ok_or_else(|| {
                        NodeError::invalid_config("values", "expected variable names")
                    })?;
                    captured.insert(alias.clone(), Self::lookup(ctx, name));
                }
                return Ok(captured);
            }
            Some(_) => return Err(NodeError::invalid_config("values", "expected a list or map")),
            None => {}
        }

        if let Some(template) = ctx.node.config_str("template") {
            captured.insert("output".to_string(), Value::String(ctx.render(template)));
            return Ok(captured);
        }

        let value = FALLBACK_NAMES
            .iter()
            .find_map(|name| ctx.variables.get(name).cloned())
            .unwrap_or_else(|| {
                ctx.log.warn("No output value found in context");
                Value::Null
            });
        captured.insert("output".to_string(), value);
        Ok(captured)
    }

    fn lookup(ctx: &NodeContext, name: &str) -> Value {
        match ctx.variables.get(name) {
            Some(value) => value.clone(),
            None => {
                ctx.log.warn(format!("output variable '{}' not found", name));
                Value::Null
            }
        }
    }
}

#[async_trait]
impl NodeHandler for OutputHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Output
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let captured = Self::collect(&ctx)?;
        ctx.log.info(format!(
            "Final output prepared: {}",
            captured.keys().cloned().collect::<Vec<_>>().join(", ")
        ));
        Ok(NodeOutput::new()
            .with_outputs(captured.clone())
            .with_capture(captured))
    }

    fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
        match node.config.get("values") {
            None | Some(Value::Array(_)) | Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(NodeError::invalid_config("values", "expected a list or map")),
        }
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Collect values into the final run output".to_string(),
            category: "flow".to_string(),
            outputs: vec![PortDefinition::new("output", "Default final value")],
        }
    }
}
