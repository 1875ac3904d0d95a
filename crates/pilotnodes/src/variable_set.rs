use crate::resolve::resolve_value;
use async_trait::async_trait;
use pilotcore::{
    HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, NodeSpec,
    PortDefinition, Value,
};

/// Assigns one or more context variables
pub struct VariableSetHandler;

static NULL: Value = Value::Null;

/// `(name, value)` pairs from either `name` + `value` or `assignments`
fn assignments(node: &NodeSpec) -> Result<Vec<(&str, &Value)>, NodeError> {
    if let Some(name) = node.config_str("name") {
        let value = node.config.get("value").unwrap_or(&NULL);
        return Ok(vec![(name, value)]);
    }
    let list = node
        .config
        .get("assignments")
        .ok_or_else(|| NodeError::MissingConfig("name".to_string()))?
        .as_array()
        .ok_or_else(|| NodeError::invalid_config("assignments", "expected a list"))?;

    list.iter()
        .map(|entry| {
            let name = entry
                .pointer("name")
                .or_else(|| entry.pointer("variable"))
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    NodeError::invalid_config("assignments", "each entry needs a 'name'")
                })?;
            Ok::<_, NodeError>((name, entry.pointer("value").unwrap_or(&NULL)))
        })
        .collect()
}

#[async_trait]
impl NodeHandler for VariableSetHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::VariableSet
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut output = NodeOutput::new();
        for (name, raw) in assignments(&ctx.node)? {
            let value = resolve_value(&ctx, raw);
            ctx.log.info(format!("Set {} = {}", name, value));
            output = output.with_output(name, value);
        }
        Ok(output)
    }

    fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
        assignments(node).map(|_| ())
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Assign values to context variables".to_string(),
            category: "data".to_string(),
            outputs: vec![PortDefinition::new("*", "One output per assigned name")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilotcore::{ContextSnapshot, Variables};
    use std::sync::Arc;

    #[tokio::test]
    async fn assigns_list_preserving_types() {
        let entry = |name: &str, value: Value| {
            Value::Object(Variables::from([
                ("name".to_string(), Value::from(name)),
                ("value".to_string(), value),
            ]))
        };
        let node = NodeSpec::new("set", NodeKind::VariableSet).with_config(
            "assignments",
            Value::Array(vec![
                entry("copy", Value::from("{{fetch.body}}")),
                entry("greeting", Value::from("hi {{user}}")),
            ]),
        );

        let mut body = Variables::new();
        body.insert("id".into(), Value::from(9i64));
        let vars = Variables::from([
            ("fetch.body".to_string(), Value::Object(body.clone())),
            ("user".to_string(), Value::from("Lin")),
        ]);
        let ctx = NodeContext::new(
            "run".into(),
            node,
            ContextSnapshot::from_variables(vars),
            Arc::new(Variables::new()),
        );

        let output = VariableSetHandler.execute(ctx).await.unwrap();
        assert_eq!(output.outputs["copy"], Value::Object(body));
        assert_eq!(output.outputs["greeting"], Value::from("hi Lin"));
    }

    #[test]
    fn requires_a_name() {
        let node = NodeSpec::new("set", NodeKind::VariableSet).with_config("value", 1i64);
        assert!(VariableSetHandler.validate_config(&node).is_err());
    }
}
