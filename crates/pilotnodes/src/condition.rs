use crate::expression::{self, comparison_operator};
use crate::resolve::{reference_name, resolve_value};
use async_trait::async_trait;
use pilotcore::{
    template, HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, NodeSpec,
    PortDefinition, Value,
};

/// Chooses the `true` or `false` branch
///
/// Either an `expression`, or a `conditions` list of
/// `{variable, operator, value}` combined with `logical_operator`
/// (`and` by default). With neither, the result is `true`.
pub struct ConditionHandler;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Logic {
    And,
    Or,
}

fn logic(node: &NodeSpec) -> Result<Logic, NodeError> {
    match node.config_str("logical_operator").map(str::to_lowercase).as_deref() {
        None | Some("and") => Ok(Logic::And),
        Some("or") => Ok(Logic::Or),
        Some(other) => Err(NodeError::invalid_config(
            "logical_operator",
            format!("expected 'and' or 'or', got '{}'", other),
        )),
    }
}

fn check_condition(entry: &Value) -> Result<(), NodeError> {
    let variable = entry.pointer("variable").and_then(Value::as_str);
    let operator = entry.pointer("operator").and_then(Value::as_str);
    match (variable, operator) {
        (Some(_), Some(op)) if is_known_operator(op) => Ok(()),
        (Some(_), Some(op)) => Err(NodeError::invalid_config(
            "conditions",
            format!("unknown operator '{}'", op),
        )),
        _ => Err(NodeError::invalid_config(
            "conditions",
            "each condition needs 'variable' and 'operator'",
        )),
    }
}

fn is_known_operator(op: &str) -> bool {
    comparison_operator(op).is_some()
        || matches!(op, "contains" | "not_contains" | "empty" | "not_empty")
}

fn evaluate_condition(ctx: &NodeContext, entry: &Value) -> bool {
    let name = entry
        .pointer("variable")
        .and_then(Value::as_str)
        .map(reference_name)
        .unwrap_or_default();
    let left = template::lookup(ctx.variables.variables(), name)
        .cloned()
        .unwrap_or(Value::Null);
    let right = entry
        .pointer("value")
        .map(|v| resolve_value(ctx, v))
        .unwrap_or(Value::Null);
    let operator = entry
        .pointer("operator")
        .and_then(Value::as_str)
        .unwrap_or("==");

    match operator {
        "contains" => contains(&left, &right),
        "not_contains" => !contains(&left, &right),
        "empty" => is_empty(&left),
        "not_empty" => !is_empty(&left),
        op => comparison_operator(op)
            .map(|op| expression::compare(&left, &right, op))
            .unwrap_or(false),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), n) => h.contains(n.render().as_str()),
        (Value::Array(items), n) => items.contains(n),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl NodeHandler for ConditionHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Condition
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let result = if let Some(expr) = ctx.node.config_str("expression") {
            expression::evaluate(expr, ctx.variables.variables())
                .map_err(|e| NodeError::Evaluation(e.to_string()))?
        } else if let Some(conditions) = ctx.node.config.get("conditions").and_then(Value::as_array)
        {
            let mut results = conditions.iter().map(|c| evaluate_condition(&ctx, c));
            match logic(&ctx.node)? {
                Logic::And => results.all(|r| r),
                Logic::Or => results.any(|r| r),
            }
        } else {
            ctx.log.info("No conditions specified, defaulting to true");
            true
        };

        ctx.log.info(format!("Condition evaluated to: {}", result));
        Ok(NodeOutput::new()
            .with_output("result", result)
            .with_output("branch", result.to_string())
            .with_branch(result.to_string()))
    }

    fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
        if let Some(value) = node.config.get("expression") {
            let expr = value
                .as_str()
                .ok_or_else(|| NodeError::invalid_config("expression", "expected a string"))?;
            return expression::parse_check(expr)
                .map_err(|e| NodeError::invalid_config("expression", e.to_string()));
        }
        if let Some(value) = node.config.get("conditions") {
            let conditions = value
                .as_array()
                .ok_or_else(|| NodeError::invalid_config("conditions", "expected a list"))?;
            conditions.iter().try_for_each(check_condition)?;
            logic(node)?;
        }
        Ok(())
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Branch on an expression or a list of conditions".to_string(),
            category: "flow".to_string(),
            outputs: vec![
                PortDefinition::new("result", "Boolean outcome"),
                PortDefinition::new("branch", "Chosen branch: \"true\" or \"false\""),
            ],
        }
    }
}
