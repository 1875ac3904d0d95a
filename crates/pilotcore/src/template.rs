//! `{{placeholder}}` substitution shared by the execution context and
//! handlers.
//!
//! Placeholders resolve against a variable map: the exact name first
//! (`model.text` may be stored as a flat key), then the longest existing
//! prefix followed by a path into the value (`response.body.id`).
//! Unresolved placeholders are left untouched and reported back.

use crate::{Value, Variables};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Result of rendering a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// Placeholder names that had no value, in order of appearance
    pub missing: Vec<String>,
}

/// Resolve a placeholder name against a variable map
pub fn lookup<'a>(variables: &'a Variables, name: &str) -> Option<&'a Value> {
    if let Some(value) = variables.get(name) {
        return Some(value);
    }
    let mut split = name.len();
    while let Some(dot) = name[..split].rfind('.') {
        if let Some(root) = variables.get(&name[..dot]) {
            if let Some(value) = root.pointer(&name[dot + 1..]) {
                return Some(value);
            }
        }
        split = dot;
    }
    None
}

/// Substitute every `{{name}}` in `template`
pub fn render(template: &str, variables: &Variables) -> Rendered {
    let mut text = String::with_capacity(template.len());
    let mut missing = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find(OPEN) {
        let after_open = &rest[open + OPEN.len()..];
        let Some(close) = after_open.find(CLOSE) else {
            break;
        };
        text.push_str(&rest[..open]);

        let raw = &after_open[..close];
        let name = raw.trim();
        match lookup(variables, name) {
            Some(value) if !name.is_empty() => text.push_str(&value.render()),
            _ => {
                if !name.is_empty() {
                    missing.push(name.to_string());
                }
                text.push_str(OPEN);
                text.push_str(raw);
                text.push_str(CLOSE);
            }
        }
        rest = &after_open[close + CLOSE.len()..];
    }
    text.push_str(rest);

    Rendered { text, missing }
}

/// If `template` consists of exactly one placeholder, return the referenced
/// value itself so its type survives (numbers stay numbers)
pub fn single_placeholder<'a>(template: &str, variables: &'a Variables) -> Option<&'a Value> {
    let inner = template
        .trim()
        .strip_prefix(OPEN)?
        .strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    lookup(variables, inner.trim())
}
