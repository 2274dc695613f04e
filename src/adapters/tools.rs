//! Built-in tool executors.
//!
//! These cover the human-in-the-loop actions every plan may use plus a
//! generic HTTP fetch. Domain-specific tools are registered by embedders.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{InterruptReason, Interruption};
use crate::domain::ports::{ToolError, ToolExecutor, ToolOutput, ToolRegistry, REQUEST_USER_HELP};

pub const SET_CONTEXT: &str = "set_context";
pub const REQUEST_PAYMENT_APPROVAL: &str = "request_payment_approval";
pub const REQUEST_APPROVAL: &str = "request_approval";
pub const FAIL: &str = "fail";
pub const HTTP_GET: &str = "http_get";

const DEFAULT_HELP_QUESTION: &str = "A step could not be completed. How would you like to proceed?";

/// Registry with every built-in tool.
pub fn builtin_tools(http_timeout: Duration) -> DomainResult<ToolRegistry> {
    Ok(ToolRegistry::new()
        .with(SET_CONTEXT, Arc::new(SetContextTool))
        .with(REQUEST_PAYMENT_APPROVAL, Arc::new(InterruptTool::payment()))
        .with(REQUEST_APPROVAL, Arc::new(InterruptTool::approval()))
        .with(REQUEST_USER_HELP, Arc::new(InterruptTool::user_help()))
        .with(FAIL, Arc::new(FailTool))
        .with(HTTP_GET, Arc::new(HttpGetTool::new(http_timeout)?)))
}

/// Writes every parameter into the task context.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetContextTool;

#[async_trait]
impl ToolExecutor for SetContextTool {
    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let mut output = ToolOutput::ok(Value::Object(params.clone()));
        output.context_updates = params.clone();
        Ok(output)
    }
}

/// Suspends the task; the resolved parameters become the interruption data.
#[derive(Debug, Clone)]
pub struct InterruptTool {
    reason: InterruptReason,
    default_question: Option<&'static str>,
}

impl InterruptTool {
    pub fn new(reason: InterruptReason) -> Self {
        Self {
            reason,
            default_question: None,
        }
    }

    pub fn payment() -> Self {
        Self::new(InterruptReason::PaymentRequired)
    }

    pub fn approval() -> Self {
        Self::new(InterruptReason::ApprovalNeeded)
    }

    /// Clarification request; adds a `question` when the step did not provide one.
    pub fn user_help() -> Self {
        Self {
            reason: InterruptReason::ClarificationNeeded,
            default_question: Some(DEFAULT_HELP_QUESTION),
        }
    }
}

#[async_trait]
impl ToolExecutor for InterruptTool {
    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let mut data = params.clone();
        if let Some(question) = self.default_question {
            data.entry("question").or_insert_with(|| json!(question));
        }
        Err(ToolError::Interrupted(Interruption::new(
            self.reason.clone(),
            Value::Object(data),
        )))
    }
}

/// Always fails with its `message` parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailTool;

#[async_trait]
impl ToolExecutor for FailTool {
    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("step failed");
        Err(ToolError::Failed(message.to_string()))
    }
}

/// GET a URL. The body is parsed as JSON when possible.
///
/// Parameters: `url` (required), `output_key` (context key for the body).
#[derive(Debug, Clone)]
pub struct HttpGetTool {
    client: reqwest::Client,
}

impl HttpGetTool {
    pub fn new(timeout: Duration) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::ExecutionFailed(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ToolExecutor for HttpGetTool {
    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::Failed("invalid parameters: 'url' is required".to_string()))?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Failed(format!("timeout fetching {url}"))
            } else if e.is_connect() {
                ToolError::Failed(format!("connection failed for {url}: {e}"))
            } else {
                ToolError::Failed(format!("request failed for {url}: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!("HTTP {} from {url}", status.as_u16())));
        }
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Failed(format!("network error reading body from {url}: {e}")))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        tracing::debug!(url, status = status.as_u16(), "http_get succeeded");

        let mut output = ToolOutput::ok(json!({"status": status.as_u16(), "body": body.clone()}));
        if let Some(key) = params.get("output_key").and_then(Value::as_str) {
            output = output.with_update(key, body);
        }
        Ok(output)
    }
}
