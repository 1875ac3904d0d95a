use pilotcore::{template, NodeContext, Value};

/// Resolve a config value against the node's context snapshot
///
/// A string that is exactly one placeholder becomes the referenced value
/// with its type intact. Other strings are rendered. Arrays and objects are
/// resolved leaf by leaf.
pub(crate) fn resolve_value(ctx: &NodeContext, value: &Value) -> Value {
    match value {
        Value::String(s) => {
            match template::single_placeholder(s, ctx.variables.variables()) {
                Some(found) => found.clone(),
                None => Value::String(ctx.render(s)),
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(ctx, v)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(ctx, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Strip optional `{{ }}` around a variable reference
pub(crate) fn reference_name(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
