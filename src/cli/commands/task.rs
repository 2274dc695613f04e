//! Task inspection commands: `status`, `list`, `result` and `delete`.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::adapters::sqlite::SqliteTaskRepository;
use crate::cli::id_resolver::resolve_task_id;
use crate::cli::output::{colorize_status, list_table, output, truncate, CommandOutput};
use crate::cli::runtime::open_database;
use crate::domain::models::{Config, Task, TaskResultView, TaskStatus};
use crate::domain::ports::TaskRepository;
use crate::services::{CircuitState, CircuitStats};

#[derive(Debug, Serialize)]
pub struct StepOutput {
    pub id: String,
    pub action_type: String,
    pub description: String,
    pub status: String,
    pub retry_count: u32,
    pub error: Option<String>,
}

/// Full view of one task, shared by `status`, `run` and `resume`.
#[derive(Debug, Serialize)]
pub struct TaskDetailOutput {
    pub id: Uuid,
    pub user_id: String,
    pub goal: String,
    pub status: TaskStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub steps: Vec<StepOutput>,
    pub interrupt_reason: Option<String>,
    pub interrupt_data: Option<Value>,
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub circuits: Vec<CircuitStats>,
}

impl From<&Task> for TaskDetailOutput {
    fn from(task: &Task) -> Self {
        let view = TaskResultView::from(task);
        Self {
            id: task.id,
            user_id: task.user_id.clone(),
            goal: task.goal().to_string(),
            status: task.status,
            current_step: task.current_step_index,
            total_steps: task.plan.len(),
            steps: task
                .plan
                .iter()
                .map(|step| StepOutput {
                    id: step.id.clone(),
                    action_type: step.action_type.clone(),
                    description: step.description.clone(),
                    status: step.status.as_str().to_string(),
                    retry_count: step.retry_count,
                    error: step.error.clone(),
                })
                .collect(),
            interrupt_reason: task.interrupt_reason.as_ref().map(|r| r.as_str().to_string()),
            interrupt_data: task.interrupt_data.clone(),
            failure_reason: view.failure_reason,
            circuits: Vec::new(),
        }
    }
}

impl TaskDetailOutput {
    /// Attach circuits that are not closed.
    pub fn with_circuits(mut self, circuits: Vec<CircuitStats>) -> Self {
        self.circuits = circuits
            .into_iter()
            .filter(|c| c.state != CircuitState::Closed)
            .collect();
        self
    }
}

impl CommandOutput for TaskDetailOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Task: {}", self.id),
            format!("Goal: {}", self.goal),
            format!("Status: {}", colorize_status(self.status.as_str())),
        ];
        if self.total_steps > 0 {
            lines.push(format!(
                "Progress: {}/{} steps",
                self.current_step.min(self.total_steps),
                self.total_steps
            ));
            let mut table = list_table(&["#", "step", "action", "status"]);
            for (index, step) in self.steps.iter().enumerate() {
                table.add_row(vec![
                    (index + 1).to_string(),
                    truncate(&step.description, 40),
                    step.action_type.clone(),
                    colorize_status(&step.status).to_string(),
                ]);
            }
            lines.push(format!("\n{table}"));
        }
        if let Some(reason) = &self.interrupt_reason {
            lines.push(format!("\nWaiting for input: {reason}"));
            if let Some(data) = &self.interrupt_data {
                lines.push(format!("  {data}"));
            }
            lines.push(format!(
                "Continue with: steward resume {} --response '<json>' --playbook <file>",
                self.id
            ));
        }
        if let Some(reason) = &self.failure_reason {
            lines.push(format!("\nFailure: {reason}"));
        }
        for circuit in &self.circuits {
            lines.push(format!(
                "Circuit {} is {} after {} failure(s)",
                circuit.action_type,
                circuit.state.as_str(),
                circuit.failure_count
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct TaskSummaryOutput {
    pub id: Uuid,
    pub status: TaskStatus,
    pub goal: String,
    pub steps: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct TaskListOutput {
    pub tasks: Vec<TaskSummaryOutput>,
    pub total: usize,
}

impl CommandOutput for TaskListOutput {
    fn to_human(&self) -> String {
        if self.tasks.is_empty() {
            return "No tasks found.".to_string();
        }
        let mut table = list_table(&["id", "status", "steps", "goal", "updated"]);
        for task in &self.tasks {
            table.add_row(vec![
                task.id.to_string()[..8].to_string(),
                colorize_status(task.status.as_str()).to_string(),
                task.steps.clone(),
                truncate(&task.goal, 48),
                task.updated_at.clone(),
            ]);
        }
        format!("{table}\n\nShowing {} of {} task(s)", self.tasks.len(), self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct ResultOutput {
    #[serde(flatten)]
    pub view: TaskResultView,
}

impl CommandOutput for ResultOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Task: {}", self.view.task_id),
            format!("Status: {}", colorize_status(self.view.status.as_str())),
        ];
        if let Some(at) = self.view.completed_at {
            lines.push(format!("Completed at: {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        if let Some(result) = &self.view.result {
            lines.push(format!(
                "Result:\n{}",
                serde_json::to_string_pretty(result).unwrap_or_default()
            ));
        }
        if let Some(validation) = &self.view.validation {
            if let Some(note) = validation.get("note").and_then(Value::as_str) {
                lines.push(format!("Note: {note}"));
            }
        }
        if let Some(reason) = &self.view.failure_reason {
            lines.push(format!("Failure: {reason}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteOutput {
    pub success: bool,
    pub task_id: Uuid,
}

impl CommandOutput for DeleteOutput {
    fn to_human(&self) -> String {
        format!("Task {} deleted.", self.task_id)
    }
}

async fn open_repository(config: &Config) -> Result<(SqliteTaskRepository, sqlx::SqlitePool)> {
    let pool = open_database(config).await?;
    Ok((SqliteTaskRepository::new(pool.clone()), pool))
}

async fn load_task(repo: &SqliteTaskRepository, pool: &sqlx::SqlitePool, id: &str) -> Result<Task> {
    let task_id = resolve_task_id(pool, id).await?;
    repo.load(task_id)
        .await
        .context("Failed to load task")?
        .ok_or_else(|| anyhow::anyhow!("Task {task_id} not found. Use 'steward list' to see available tasks."))
}

/// Handle `steward status`
pub async fn handle_status(config: &Config, id: &str, json: bool) -> Result<()> {
    let (repo, pool) = open_repository(config).await?;
    let task = load_task(&repo, &pool, id).await?;
    output(&TaskDetailOutput::from(&task), json);
    Ok(())
}

/// Handle `steward list`
pub async fn handle_list(config: &Config, status: Option<&str>, limit: usize, json: bool) -> Result<()> {
    let filter = match status {
        Some(s) => match TaskStatus::from_str(s) {
            Some(status) => Some(status),
            None => bail!(
                "Invalid status '{s}'. Expected one of: pending, analyzing, planning, executing, validating, completed, failed, interrupted"
            ),
        },
        None => None,
    };

    let (repo, _pool) = open_repository(config).await?;
    let mut tasks = repo.list_all().await.context("Failed to list tasks")?;
    tasks.retain(|t| filter.is_none_or(|f| t.status == f));
    tasks.reverse();
    let total = tasks.len();

    let tasks = tasks
        .iter()
        .take(limit)
        .map(|t| TaskSummaryOutput {
            id: t.id,
            status: t.status,
            goal: t.goal().to_string(),
            steps: format!("{}/{}", t.completed_step_count(), t.plan.len()),
            updated_at: t.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();

    output(&TaskListOutput { tasks, total }, json);
    Ok(())
}

/// Handle `steward result`
pub async fn handle_result(config: &Config, id: &str, json: bool) -> Result<()> {
    let (repo, pool) = open_repository(config).await?;
    let task = load_task(&repo, &pool, id).await?;
    let view = TaskResultView::finished(&task)?;
    output(&ResultOutput { view }, json);
    Ok(())
}

/// Handle `steward delete`
pub async fn handle_delete(config: &Config, id: &str, json: bool) -> Result<()> {
    let (repo, pool) = open_repository(config).await?;
    let task_id = resolve_task_id(&pool, id).await?;
    repo.delete(task_id).await.context("Failed to delete task")?;
    output(&DeleteOutput { success: true, task_id }, json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Context, Interruption, Step};
    use serde_json::json;

    #[test]
    fn test_detail_output_for_interrupted_task() {
        let mut task = Task::new("cli", "Book a flight to Tokyo", Context::new());
        task.plan = vec![
            Step::new("set_context", "Search flights"),
            Step::new("request_payment_approval", "Approve payment"),
        ];
        task.plan[0].mark_completed(json!({}));
        task.current_step_index = 1;
        task.status = TaskStatus::Executing;
        task.interrupt(Interruption::new("payment_required", json!({"amount": 680})))
            .unwrap();

        let detail = TaskDetailOutput::from(&task);
        assert_eq!(detail.interrupt_reason.as_deref(), Some("payment_required"));
        assert_eq!(detail.steps[0].status, "completed");

        let json = detail.to_json();
        assert_eq!(json["status"], "interrupted");
        assert_eq!(json["interrupt_data"]["amount"], 680);
        assert!(json.get("circuits").is_none());

        let human = detail.to_human();
        assert!(human.contains("Progress: 1/2 steps"));
        assert!(human.contains("steward resume"));
    }
}
