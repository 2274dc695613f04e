//! Step parameter values.
//!
//! Parameters are either literal JSON or templates that read from the task
//! context. Templates use `{{name}}` placeholders: a string that is exactly one
//! placeholder becomes a [`ParamValue::Ref`] and keeps the referenced value's
//! type, while a string with embedded placeholders becomes a
//! [`ParamValue::Interpolate`] and always resolves to a string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A step parameter, either literal or a template over the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Literal(Value),
    Ref(String),
    Interpolate(String),
    Map(BTreeMap<String, ParamValue>),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Build a parameter from raw JSON, recognizing `{{name}}` placeholders.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) => {
                if let Some(name) = whole_placeholder(&s) {
                    Self::Ref(name.to_string())
                } else if placeholders(&s).is_empty() {
                    Self::Literal(Value::String(s))
                } else {
                    Self::Interpolate(s)
                }
            }
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            other => Self::Literal(other),
        }
    }

    /// Every context key this parameter reads, in encounter order.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(name) => out.push(name),
            Self::Interpolate(template) => out.extend(placeholders(template)),
            Self::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            Self::List(items) => items.iter().for_each(|v| v.collect_references(out)),
        }
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// `Some(name)` when the whole string is a single `{{name}}` placeholder.
fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    is_identifier(inner).then_some(inner)
}

/// Names of every well-formed `{{name}}` placeholder in a template.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        let name = &after[..end];
        if is_identifier(name) {
            names.push(name);
            rest = &after[end + 2..];
        } else {
            rest = after;
        }
    }
    names
}
