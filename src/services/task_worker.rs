//! Background worker pool for task runs.
//!
//! Runs are queued on an mpsc channel and executed with bounded concurrency.
//! The pool holds its runner weakly: once the owner of the [`TaskQueue`] is
//! dropped the channel closes, in-flight runs are drained and the loop ends.
//! A run that ends in an error is published as a `failed` event.

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TaskStatus;
use crate::services::event_bus::{EventBus, ProgressKind};

/// What a queued run should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunKind {
    /// Drive the task from the beginning.
    Start,
    /// Continue a resumed task; `retry_step` is re-executed before the remaining waves.
    Resume { retry_step: Option<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRun {
    pub task_id: Uuid,
    pub kind: TaskRunKind,
}

impl TaskRun {
    pub fn start(task_id: Uuid) -> Self {
        Self { task_id, kind: TaskRunKind::Start }
    }

    pub fn resume(task_id: Uuid, retry_step: Option<usize>) -> Self {
        Self {
            task_id,
            kind: TaskRunKind::Resume { retry_step },
        }
    }
}

/// Executes one run until the task settles, returning the settled status.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, run: TaskRun) -> DomainResult<TaskStatus>;
}

/// Sending half of the pool.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<TaskRun>,
}

impl TaskQueue {
    pub async fn enqueue(&self, run: TaskRun) -> DomainResult<()> {
        debug!(task_id = %run.task_id, kind = ?run.kind, "enqueueing task run");
        self.sender
            .send(run)
            .await
            .map_err(|_| DomainError::ExecutionFailed("Task worker pool is not running".to_string()))
    }
}

/// Receiving half of the pool.
#[derive(Debug)]
pub struct TaskWorkerPool {
    receiver: mpsc::Receiver<TaskRun>,
    max_concurrent: usize,
    events: Option<Arc<EventBus>>,
}

impl TaskWorkerPool {
    pub fn channel(capacity: usize, max_concurrent: usize) -> (TaskQueue, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            TaskQueue { sender },
            Self {
                receiver,
                max_concurrent: max_concurrent.max(1),
                events: None,
            },
        )
    }

    /// Publish a `failed` event for runs that return an error.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn spawn(self, runner: Weak<dyn TaskRunner>) -> JoinHandle<()> {
        tokio::spawn(self.run(runner))
    }

    /// Consume runs until the queue closes or the runner is gone.
    pub async fn run(mut self, runner: Weak<dyn TaskRunner>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut running = JoinSet::new();
        info!(max_concurrent = self.max_concurrent, "task worker pool started");

        while let Some(run) = self.receiver.recv().await {
            while let Some(joined) = running.try_join_next() {
                log_finished(joined);
            }
            let Some(runner) = runner.upgrade() else {
                break;
            };
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let events = self.events.clone();
            running.spawn(async move {
                let _permit = permit;
                let task_id = run.task_id;
                let result = runner.run(run).await;
                if let (Err(err), Some(events)) = (&result, events) {
                    events.publish(
                        task_id,
                        ProgressKind::Failed {
                            error: err.to_string(),
                        },
                    );
                }
                (task_id, result)
            });
        }

        while let Some(joined) = running.join_next().await {
            log_finished(joined);
        }
        info!("task worker pool stopped");
    }
}

fn log_finished(joined: Result<(Uuid, DomainResult<TaskStatus>), JoinError>) {
    match joined {
        Ok((task_id, Ok(status))) => info!(task_id = %task_id, status = %status, "task run settled"),
        Ok((task_id, Err(err))) => error!(task_id = %task_id, error = %err, "task run failed"),
        Err(err) => error!(error = %err, "task run panicked"),
    }
}
