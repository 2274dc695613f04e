//! Tool executor port.
//!
//! Tools perform the actual work of a step. They receive the step's resolved
//! parameters, never the task context itself, and contribute new context
//! entries through [`ToolOutput::context_updates`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::models::{Context, Interruption};

/// Successful (or soft-failed) tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub context_updates: Context,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(result: Value) -> Self {
        Self { success: true, result, context_updates: Context::new(), error: None }
    }

    /// A tool that ran but reports that it did not achieve its action.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            context_updates: Context::new(),
            error: Some(error.into()),
        }
    }

    pub fn with_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }
}

/// Why a tool did not produce an output.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// Classified by the retry engine from its message.
    #[error("{0}")]
    Failed(String),

    /// Execution needs a human; never retried.
    #[error("interruption required: {}", .0.reason)]
    Interrupted(Interruption),
}

/// Executes the steps of one action type.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolOutput, ToolError>;
}

/// Action type to executor lookup.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action_type: impl Into<String>, tool: Arc<dyn ToolExecutor>) {
        self.tools.insert(action_type.into(), tool);
    }

    pub fn with(mut self, action_type: impl Into<String>, tool: Arc<dyn ToolExecutor>) -> Self {
        self.register(action_type, tool);
        self
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools.get(action_type).cloned()
    }

    pub fn action_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.tools.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("action_types", &self.action_types())
            .finish()
    }
}
