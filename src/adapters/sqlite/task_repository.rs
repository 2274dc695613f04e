//! SQLite implementation of the TaskRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_json_or_default, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{InterruptReason, Task, TaskStatus};
use crate::domain::ports::TaskRepository;

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn save(&self, task: &Task) -> DomainResult<()> {
        let outcome_json = task.outcome.as_ref().map(serde_json::to_string).transpose()?;
        let plan_json = serde_json::to_string(&task.plan)?;
        let context_json = serde_json::to_string(&task.context)?;
        let history_json = serde_json::to_string(&task.history)?;
        let interrupt_data_json = task.interrupt_data.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO tasks (id, user_id, status, outcome, plan, current_step_index,
               context, history, interrupt_reason, interrupt_data, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   user_id = excluded.user_id,
                   status = excluded.status,
                   outcome = excluded.outcome,
                   plan = excluded.plan,
                   current_step_index = excluded.current_step_index,
                   context = excluded.context,
                   history = excluded.history,
                   interrupt_reason = excluded.interrupt_reason,
                   interrupt_data = excluded.interrupt_data,
                   updated_at = excluded.updated_at,
                   completed_at = excluded.completed_at"#,
        )
        .bind(task.id.to_string())
        .bind(&task.user_id)
        .bind(task.status.as_str())
        .bind(outcome_json)
        .bind(plan_json)
        .bind(i64::try_from(task.current_step_index).unwrap_or(i64::MAX))
        .bind(context_json)
        .bind(history_json)
        .bind(task.interrupt_reason.as_ref().map(|r| r.as_str().to_string()))
        .bind(interrupt_data_json)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_if_unchanged(&self, task: &Task, seen: &Task) -> DomainResult<bool> {
        let outcome_json = task.outcome.as_ref().map(serde_json::to_string).transpose()?;
        let plan_json = serde_json::to_string(&task.plan)?;
        let context_json = serde_json::to_string(&task.context)?;
        let history_json = serde_json::to_string(&task.history)?;
        let interrupt_data_json = task.interrupt_data.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"UPDATE tasks SET
                   user_id = ?, status = ?, outcome = ?, plan = ?, current_step_index = ?,
                   context = ?, history = ?, interrupt_reason = ?, interrupt_data = ?,
                   updated_at = ?, completed_at = ?
               WHERE id = ? AND status = ? AND updated_at = ?"#,
        )
        .bind(&task.user_id)
        .bind(task.status.as_str())
        .bind(outcome_json)
        .bind(plan_json)
        .bind(i64::try_from(task.current_step_index).unwrap_or(i64::MAX))
        .bind(context_json)
        .bind(history_json)
        .bind(task.interrupt_reason.as_ref().map(|r| r.as_str().to_string()))
        .bind(interrupt_data_json)
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.id.to_string())
        .bind(seen.status.as_str())
        .bind(seen.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn load(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Task::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(id));
        }
        Ok(())
    }

    async fn list_all(&self) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Task::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    user_id: String,
    status: String,
    outcome: Option<String>,
    plan: String,
    current_step_index: i64,
    context: String,
    history: String,
    interrupt_reason: Option<String>,
    interrupt_data: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;

        let current_step_index = usize::try_from(row.current_step_index).map_err(|_| {
            DomainError::SerializationError(format!("Invalid step index: {}", row.current_step_index))
        })?;

        Ok(Task {
            id: parse_uuid(&row.id)?,
            user_id: row.user_id,
            status,
            outcome: row.outcome.map(|s| serde_json::from_str(&s)).transpose()?,
            plan: serde_json::from_str(&row.plan)?,
            current_step_index,
            context: serde_json::from_str(&row.context)?,
            history: parse_json_or_default(Some(row.history))?,
            interrupt_reason: row.interrupt_reason.map(InterruptReason::from),
            interrupt_data: row.interrupt_data.map(|s| serde_json::from_str(&s)).transpose()?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{Context, Interruption, OutcomeDefinition, Step};
    use serde_json::json;

    async fn setup_test_repo() -> SqliteTaskRepository {
        SqliteTaskRepository::new(create_migrated_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_save_is_an_upsert() {
        let repo = setup_test_repo().await;
        let mut task = Task::new("user-1", "Book a flight to Tokyo", Context::new());
        repo.save(&task).await.unwrap();

        task.transition_to(TaskStatus::Analyzing).unwrap();
        repo.save(&task).await.unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TaskStatus::Analyzing);
    }

    #[tokio::test]
    async fn test_round_trip_interrupted_task() {
        let repo = setup_test_repo().await;
        let mut task = Task::new("user-1", "Book a flight to Tokyo", Context::new());
        task.outcome = Some(OutcomeDefinition::new("Book a flight to Tokyo", "travel"));
        task.plan = vec![Step::new("search_flights", "Search").with_param("to", "{{destination}}")];
        task.status = TaskStatus::Executing;
        task.interrupt(Interruption::new("payment_required", json!({"amount": 680})))
            .unwrap();
        repo.save(&task).await.unwrap();

        let loaded = repo.load(task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task);
    }

    #[tokio::test]
    async fn test_save_if_unchanged_is_conditional() {
        let repo = setup_test_repo().await;
        let mut task = Task::new("user-1", "Book a flight to Tokyo", Context::new());
        task.status = TaskStatus::Executing;
        task.interrupt(Interruption::new("payment_required", json!({"amount": 680})))
            .unwrap();
        repo.save(&task).await.unwrap();
        let seen = repo.load(task.id).await.unwrap().unwrap();

        let mut first = seen.clone();
        first.clear_interrupt();
        first.transition_to(TaskStatus::Executing).unwrap();
        first.context.insert("user_payment_method".to_string(), json!("card_A"));
        let mut second = first.clone();
        second.context.insert("user_payment_method".to_string(), json!("card_B"));

        assert!(repo.save_if_unchanged(&first, &seen).await.unwrap());
        assert!(!repo.save_if_unchanged(&second, &seen).await.unwrap());

        let stored = repo.load(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Executing);
        assert_eq!(stored.context["user_payment_method"], "card_A");

        // Same status again, but saved since `seen` was read.
        let mut again = stored.clone();
        again.interrupt(Interruption::new("payment_required", json!({"amount": 90})))
            .unwrap();
        repo.save(&again).await.unwrap();
        let mut stale = seen.clone();
        stale.context.insert("user_payment_method".to_string(), json!("card_C"));
        assert!(!repo.save_if_unchanged(&stale, &seen).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_task() {
        let repo = setup_test_repo().await;
        let err = repo.delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DomainError::TaskNotFound(_)));
        assert!(repo.load(Uuid::new_v4()).await.unwrap().is_none());
    }
}
