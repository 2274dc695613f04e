//! Live progress display for commands that wait on a task.

use anyhow::{bail, Context as _, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::time::Duration;

use crate::domain::models::Context;
use crate::services::{ProgressEvent, ProgressKind};

const SPINNER_TEMPLATE: &str = "[{elapsed_precise}] {spinner:.green} {msg}";
const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Spinner on stderr; hidden in JSON mode so stdout stays parseable.
pub fn spinner(json_mode: bool) -> ProgressBar {
    if json_mode {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_CHARS);
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Render one progress event above the spinner.
pub fn report(pb: &ProgressBar, event: &ProgressEvent) {
    match &event.kind {
        ProgressKind::StatusChange { status } => pb.set_message(status.to_string()),
        ProgressKind::StepComplete {
            step,
            total_steps,
            description,
            ..
        } => pb.println(format!(
            "  {} [{step}/{total_steps}] {description}",
            style("✓").green()
        )),
        ProgressKind::StepFailed { step, error, .. } => {
            pb.println(format!("  {} [{step}] {error}", style("✗").red()));
        }
        ProgressKind::Interrupted { reason, .. } => {
            pb.set_message(format!("waiting for input ({reason})"));
        }
        ProgressKind::Completed { .. } => pb.set_message("completed"),
        ProgressKind::Failed { error } => pb.set_message(format!("failed: {error}")),
    }
}

/// Parse an optional JSON object argument.
pub fn parse_object(raw: Option<&str>, flag: &str) -> Result<Context> {
    let Some(raw) = raw else {
        return Ok(Context::new());
    };
    let value: Value = serde_json::from_str(raw).with_context(|| format!("{flag} must be valid JSON"))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("{flag} must be a JSON object"),
    }
}

/// Parse a resume response. Text that is not JSON is taken as a clarification answer.
pub fn parse_response(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "answer": raw }))
}
