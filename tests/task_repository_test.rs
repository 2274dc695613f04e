//! Task store behaviour shared by the SQLite and in-memory adapters.

use serde_json::json;
use std::time::Duration;
use steward::adapters::sqlite::{initialize_database, SqliteTaskRepository};
use steward::adapters::InMemoryTaskRepository;
use steward::domain::models::{
    Context, DatabaseConfig, InterruptReason, Interruption, OutcomeDefinition, Step, Task, TaskStatus,
};
use steward::domain::ports::TaskRepository;
use steward::DomainError;
use tempfile::TempDir;

fn db_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        path: dir.path().join("steward.db").to_string_lossy().into_owned(),
        ..DatabaseConfig::default()
    }
}

fn interrupted_task() -> Task {
    let mut context = Context::new();
    context.insert("destination".to_string(), json!("Tokyo"));
    let mut task = Task::new("user-7", "Book a flight to Tokyo under $800", context);
    task.outcome = Some(
        OutcomeDefinition::new("Book a flight to Tokyo under $800", "travel")
            .with_criterion("Flight booked"),
    );
    let mut search = Step::new("set_context", "Search flights")
        .with_id("search")
        .with_param("flight_options", json!(["NH107"]))
        .with_output("flight_options");
    search.mark_completed(json!({"flight_options": ["NH107"]}));
    task.plan = vec![
        search,
        Step::new("request_payment_approval", "Approve payment")
            .with_id("pay")
            .with_dependency("search")
            .with_param("amount", "{{fare}}"),
    ];
    task.current_step_index = 1;
    task.transition_to(TaskStatus::Analyzing).unwrap();
    task.transition_to(TaskStatus::Planning).unwrap();
    task.transition_to(TaskStatus::Executing).unwrap();
    task.interrupt(Interruption::new(InterruptReason::PaymentRequired, json!({"amount": 680})))
        .unwrap();
    task
}

async fn exercise_store(store: &dyn TaskRepository) {
    let first = Task::new("user-1", "Plan a weekend in Kyoto", Context::new());
    store.save(&first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let second = interrupted_task();
    store.save(&second).await.unwrap();

    let loaded = store.load(second.id).await.unwrap().unwrap();
    assert_eq!(loaded, second);
    assert_eq!(loaded.interrupt_reason, Some(InterruptReason::PaymentRequired));
    assert_eq!(loaded.plan[1].dependencies, vec!["search".to_string()]);

    let ids: Vec<_> = store.list_all().await.unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);

    store.delete(first.id).await.unwrap();
    assert!(store.load(first.id).await.unwrap().is_none());
    assert!(matches!(store.delete(first.id).await, Err(DomainError::TaskNotFound(_))));
    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_in_memory_store_contract() {
    exercise_store(&InMemoryTaskRepository::new()).await;
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    let dir = TempDir::new().unwrap();
    let pool = initialize_database(&db_config(&dir)).await.unwrap();
    exercise_store(&SqliteTaskRepository::new(pool)).await;
}

#[tokio::test]
async fn test_sqlite_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let task = interrupted_task();

    let pool = initialize_database(&db_config(&dir)).await.unwrap();
    SqliteTaskRepository::new(pool.clone()).save(&task).await.unwrap();
    pool.close().await;

    // Reopening runs migrations again; they must be idempotent.
    let pool = initialize_database(&db_config(&dir)).await.unwrap();
    let loaded = SqliteTaskRepository::new(pool).load(task.id).await.unwrap().unwrap();
    assert_eq!(loaded, task);
    assert_eq!(loaded.status, TaskStatus::Interrupted);
    assert_eq!(loaded.interrupt_data, Some(json!({"amount": 680})));
}
