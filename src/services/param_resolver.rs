//! Resolution of step parameters against the task context.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{params, Context, ParamValue, Step};

/// Context keys written by the orchestrator itself when a task resumes.
/// Plans may reference them without any step declaring them.
pub const RESUME_KEYS: &[&str] = &[
    "user_response",
    "user_payment_method",
    "payment_approved",
    "approval_response",
    "approval_received",
    "clarification_answer",
];

/// Resolve one parameter. A missing `Ref` resolves to `null`; a missing
/// placeholder inside an `Interpolate` is left as written.
pub fn resolve(value: &ParamValue, context: &Context) -> Value {
    match value {
        ParamValue::Literal(v) => v.clone(),
        ParamValue::Ref(name) => context.get(name).cloned().unwrap_or_else(|| {
            tracing::warn!(key = %name, "template reference not found in context");
            Value::Null
        }),
        ParamValue::Interpolate(template) => Value::String(interpolate(template, context)),
        ParamValue::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, context)))
                .collect(),
        ),
        ParamValue::List(items) => Value::Array(items.iter().map(|v| resolve(v, context)).collect()),
    }
}

/// Resolve every parameter of a step into the map handed to its tool.
pub fn resolve_parameters(
    parameters: &BTreeMap<String, ParamValue>,
    context: &Context,
) -> Map<String, Value> {
    parameters
        .iter()
        .map(|(k, v)| (k.clone(), resolve(v, context)))
        .collect()
}

fn interpolate(template: &str, context: &Context) -> String {
    let mut out = template.to_string();
    for name in params::placeholders(template) {
        match context.get(name) {
            Some(Value::String(s)) => out = out.replace(&format!("{{{{{name}}}}}"), s),
            Some(other) => out = out.replace(&format!("{{{{{name}}}}}"), &other.to_string()),
            None => tracing::warn!(key = name, "template placeholder not found in context"),
        }
    }
    out
}

/// Check that step ids are unique and that every template reference in
/// `plan` names a key that is in the context, is declared as some step's
/// output, or is a resume key.
pub fn validate_plan(plan: &[Step], context: &Context) -> DomainResult<()> {
    let mut ids = HashSet::new();
    if let Some(step) = plan.iter().find(|s| !ids.insert(s.id.as_str())) {
        return Err(DomainError::ValidationFailed(format!(
            "Duplicate step id '{}'",
            step.id
        )));
    }

    let known: HashSet<&str> = context
        .keys()
        .map(String::as_str)
        .chain(plan.iter().flat_map(|s| s.outputs.iter().map(String::as_str)))
        .chain(RESUME_KEYS.iter().copied())
        .collect();

    for step in plan {
        for value in step.parameters.values() {
            if let Some(name) = value.references().into_iter().find(|n| !known.contains(n)) {
                return Err(DomainError::UnresolvedReference {
                    step_id: step.id.clone(),
                    name: name.to_string(),
                });
            }
        }
    }
    Ok(())
}
