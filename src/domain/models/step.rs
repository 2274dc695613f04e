//! Plan step domain model.
//!
//! A step is one schedulable action inside a task's plan. Steps form a DAG
//! through their `dependencies`, which name other step ids in the same plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::params::ParamValue;

/// Execution status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

const fn default_max_retries() -> u32 {
    3
}

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    /// Names the tool that executes this step.
    pub action_type: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    /// Step ids that must be completed before this one may start.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Context keys this step is expected to contribute.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    /// Create a pending step with a fresh id.
    pub fn new(action_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            action_type: action_type.into(),
            parameters: BTreeMap::new(),
            dependencies: Vec::new(),
            outputs: Vec::new(),
            status: StepStatus::Pending,
            retry_count: 0,
            max_retries: default_max_retries(),
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a parameter; `{{name}}` placeholders in strings become templates.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters
            .insert(key.into(), ParamValue::from_json(value.into()));
        self
    }

    pub fn with_dependency(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.outputs.push(key.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    pub fn mark_in_progress(&mut self) {
        self.status = StepStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: Value) {
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
    }

    /// Return a step whose attempt was discarded to the pending pool.
    pub fn reset_pending(&mut self) {
        self.status = StepStatus::Pending;
        self.started_at = None;
    }
}
