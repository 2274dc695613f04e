//! Result summaries exposed to the presentation layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::task::{Task, TaskStatus};
use crate::domain::errors::{DomainError, DomainResult};

pub const FINAL_RESULT_KEY: &str = "final_result";
pub const VALIDATION_RESULT_KEY: &str = "validation_result";
pub const FAILURE_REASON_KEY: &str = "failure_reason";

/// Summary stored in the context when a task completes.
pub fn build_result_summary(task: &Task) -> Value {
    let (goal, domain) = match &task.outcome {
        Some(outcome) => (outcome.original_goal.clone(), outcome.domain.clone()),
        None => (task.goal().to_string(), "unknown".to_string()),
    };
    json!({
        "task_id": task.id,
        "goal": goal,
        "domain": domain,
        "completed_at": task.completed_at,
        "total_steps": task.plan.len(),
        "completed_steps": task.completed_step_count(),
    })
}

/// Outcome view of a task, whatever state it is in.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResultView {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub validation: Option<Value>,
    pub failure_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskResultView {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            result: task.context.get(FINAL_RESULT_KEY).cloned(),
            validation: task.context.get(VALIDATION_RESULT_KEY).cloned(),
            failure_reason: task
                .context
                .get(FAILURE_REASON_KEY)
                .and_then(Value::as_str)
                .map(str::to_string),
            completed_at: task.completed_at,
        }
    }
}

impl TaskResultView {
    /// View of a task that has reached a terminal status.
    pub fn finished(task: &Task) -> DomainResult<Self> {
        if !task.status.is_terminal() {
            return Err(DomainError::ExecutionFailed(format!(
                "Task {} has not finished (status: {})",
                task.id, task.status
            )));
        }
        Ok(Self::from(task))
    }
}
