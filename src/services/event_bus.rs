//! EventBus service for per-task progress streaming.
//!
//! A single broadcast channel carries every task's events; subscribers either
//! take the whole stream or a [`TaskSubscription`] filtered to one task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{InterruptReason, TaskStatus};

/// Monotonically increasing sequence number assigned by EventBus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    StatusChange {
        status: TaskStatus,
    },
    StepComplete {
        step_id: String,
        /// One-based position in the plan.
        step: usize,
        total_steps: usize,
        description: String,
    },
    StepFailed {
        step_id: String,
        step: usize,
        error: String,
    },
    Interrupted {
        reason: InterruptReason,
        data: Value,
    },
    Completed {
        result: Value,
        validation: Value,
    },
    Failed {
        error: String,
    },
}

impl ProgressKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusChange { .. } => "status_change",
            Self::StepComplete { .. } => "step_complete",
            Self::StepFailed { .. } => "step_failed",
            Self::Interrupted { .. } => "interrupted",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    /// True for events after which the task waits for nothing internal.
    pub fn is_settling(&self) -> bool {
        matches!(self, Self::Interrupted { .. } | Self::Completed { .. } | Self::Failed { .. })
    }
}

/// A timestamped progress event for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub sequence: SequenceNumber,
    pub task_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

/// Broadcast hub for progress events.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
    sequence: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, task_id: Uuid, kind: ProgressKind) -> ProgressEvent {
        let event = ProgressEvent {
            sequence: SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst) + 1),
            task_id,
            timestamp: Utc::now(),
            kind,
        };
        tracing::debug!(task_id = %task_id, event = event.kind.name(), sequence = %event.sequence, "progress event");
        let _ = self.sender.send(event.clone());
        event
    }

    /// Every task's events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Events for a single task.
    pub fn subscribe_task(&self, task_id: Uuid) -> TaskSubscription {
        TaskSubscription {
            task_id,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver filtered to one task.
#[derive(Debug)]
pub struct TaskSubscription {
    task_id: Uuid,
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl TaskSubscription {
    /// Filter an existing receiver, e.g. one taken before the task id was known.
    pub fn new(task_id: Uuid, receiver: broadcast::Receiver<ProgressEvent>) -> Self {
        Self { task_id, receiver }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Next event for this task; `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.task_id == self.task_id => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(task_id = %self.task_id, skipped, "progress subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_assigns_increasing_sequence() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.publish(id, ProgressKind::StatusChange { status: TaskStatus::Analyzing });
        bus.publish(id, ProgressKind::StatusChange { status: TaskStatus::Planning });

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert!(a.sequence < b.sequence);
        assert_eq!(a.task_id, id);
    }

    #[tokio::test]
    async fn test_task_subscription_filters_other_tasks() {
        let bus = EventBus::new(16);
        let mine = Uuid::new_v4();
        let mut sub = bus.subscribe_task(mine);

        bus.publish(Uuid::new_v4(), ProgressKind::Failed { error: "other".into() });
        bus.publish(mine, ProgressKind::Failed { error: "mine".into() });

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, ProgressKind::Failed { error: "mine".into() });
        assert!(event.kind.is_settling());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let event = bus.publish(Uuid::new_v4(), ProgressKind::Failed { error: "x".into() });
        assert_eq!(event.sequence, SequenceNumber(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let bus = EventBus::default();
        let id = Uuid::new_v4();
        let event = bus.publish(
            id,
            ProgressKind::StepComplete {
                step_id: "s1".into(),
                step: 1,
                total_steps: 10,
                description: "Search flights".into(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_complete");
        assert_eq!(json["task_id"], id.to_string());
        assert_eq!(json["total_steps"], 10);
        assert!(json["timestamp"].is_string());
    }
}
