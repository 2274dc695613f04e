//! Wiring of the engine for CLI commands.

use anyhow::{anyhow, Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapters::sqlite::{initialize_database, SqliteTaskRepository};
use crate::adapters::{builtin_tools, Playbook};
use crate::domain::models::{Config, Task, TaskStatus};
use crate::domain::ports::TaskRepository;
use crate::services::{
    CircuitBreakerConfig, CircuitBreakerService, Collaborators, DagExecutor, EventBus, ExecutorConfig,
    Orchestrator, ProgressEvent, RetryEngine, RetryPolicy, TaskSubscription,
};

/// How often a waiting command re-reads the task in case an event was missed.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Open the configured database with migrations applied.
pub async fn open_database(config: &Config) -> Result<SqlitePool> {
    initialize_database(&config.database)
        .await
        .context("Failed to initialize database. Run 'steward init' first.")
}

/// An orchestrator driven by a playbook, with its worker pool.
pub struct Runtime {
    orchestrator: Arc<Orchestrator>,
    pool: SqlitePool,
    worker: JoinHandle<()>,
}

impl Runtime {
    pub async fn open(config: &Config, playbook_path: &Path) -> Result<Self> {
        let playbook = Playbook::load(playbook_path)
            .with_context(|| format!("Failed to load playbook {}", playbook_path.display()))?
            .with_fallback_max_retries(config.retry.max_retries);
        let playbook = Arc::new(playbook);

        let pool = open_database(config).await?;
        let store: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));

        let events = Arc::new(EventBus::new(config.orchestrator.event_channel_capacity));
        let breaker = Arc::new(CircuitBreakerService::new(CircuitBreakerConfig::from(
            &config.circuit_breaker,
        )));
        let retry = RetryEngine::new(RetryPolicy::from(&config.retry), breaker);
        let tools = builtin_tools(Duration::from_secs(config.retry.step_timeout_secs))
            .context("Failed to build tool registry")?;
        let executor = DagExecutor::new(retry, Arc::new(tools), ExecutorConfig::from(&config.orchestrator))
            .with_events(Arc::clone(&events));

        let collaborators = Collaborators {
            interpreter: playbook.clone(),
            planner: playbook.clone(),
            validator: playbook,
        };
        let (orchestrator, worker) = Orchestrator::start(
            store,
            collaborators,
            Arc::new(executor),
            events,
            config.orchestrator.clone(),
        );

        Ok(Self {
            orchestrator,
            pool,
            worker,
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait until the task completes, fails or is interrupted.
    ///
    /// `on_event` sees every event of the task as it arrives.
    pub async fn wait_for_settlement(
        &self,
        mut subscription: TaskSubscription,
        mut on_event: impl FnMut(&ProgressEvent),
    ) -> Result<Task> {
        let task_id = subscription.task_id();
        let mut poll = tokio::time::interval(STATUS_POLL_INTERVAL);
        poll.tick().await;

        loop {
            tokio::select! {
                event = subscription.recv() => {
                    let event = event.ok_or_else(|| anyhow!("Event stream closed before task {task_id} settled"))?;
                    on_event(&event);
                    if event.kind.is_settling() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    let status = self.load(task_id).await?.status;
                    if status.is_terminal() || status == TaskStatus::Interrupted {
                        debug!(task_id = %task_id, %status, "task settled without a final event");
                        break;
                    }
                }
            }
        }

        self.load(task_id).await
    }

    async fn load(&self, task_id: uuid::Uuid) -> Result<Task> {
        self.orchestrator
            .get_status(task_id)
            .await?
            .ok_or_else(|| anyhow!("Task {task_id} disappeared while running"))
    }

    /// Stop the worker pool and close the database.
    pub async fn shutdown(self) {
        let Self {
            orchestrator,
            pool,
            worker,
        } = self;
        drop(orchestrator);
        if tokio::time::timeout(SHUTDOWN_GRACE, worker).await.is_err() {
            warn!("worker pool did not stop in time");
        }
        pool.close().await;
    }
}
