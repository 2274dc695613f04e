use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Task;

/// Repository port for task persistence (the state store).
///
/// Implementations must round-trip every field of a [`Task`] losslessly and
/// serialize writes for the same task id.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert or replace a task
    async fn save(&self, task: &Task) -> DomainResult<()>;

    /// Replace the stored task only if it still has the status and
    /// `updated_at` of `seen`, the copy the caller loaded.
    ///
    /// Returns `false` without writing when the task is missing or another
    /// writer has saved it since.
    async fn save_if_unchanged(&self, task: &Task, seen: &Task) -> DomainResult<bool>;

    /// Get a task by ID
    async fn load(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Delete a task by ID; `TaskNotFound` if absent
    async fn delete(&self, id: Uuid) -> DomainResult<()>;

    /// All tasks, oldest first
    async fn list_all(&self) -> DomainResult<Vec<Task>>;
}
