//! Task domain model.
//!
//! A task is one end-to-end unit of orchestrated work: a goal, the outcome it
//! was interpreted into, the plan executing it, and the context threaded
//! through every step. Status changes go through [`Task::transition_to`],
//! which enforces the lifecycle table below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::interruption::{InterruptReason, Interruption};
use super::outcome::OutcomeDefinition;
use super::step::Step;
use crate::domain::errors::{DomainError, DomainResult};

/// Shared, accumulating key/value state of a task.
pub type Context = Map<String, Value>;

/// Context key holding the (trimmed) goal text.
pub const GOAL_KEY: &str = "goal";
/// Context key counting validate-and-replan rounds.
pub const REPLAN_COUNT_KEY: &str = "_replan_count";

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Analyzing,
    Planning,
    Executing,
    Waiting,
    Retrying,
    Interrupted,
    Validating,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [Self; 10] = [
        Self::Pending,
        Self::Analyzing,
        Self::Planning,
        Self::Executing,
        Self::Waiting,
        Self::Retrying,
        Self::Interrupted,
        Self::Validating,
        Self::Completed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Waiting => "waiting",
            Self::Retrying => "retrying",
            Self::Interrupted => "interrupted",
            Self::Validating => "validating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s.to_lowercase())
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Analyzing],
            Self::Analyzing => &[Self::Planning, Self::Interrupted, Self::Failed],
            Self::Planning => &[Self::Executing, Self::Interrupted, Self::Failed],
            Self::Executing => &[
                Self::Waiting,
                Self::Retrying,
                Self::Validating,
                Self::Interrupted,
                Self::Failed,
            ],
            Self::Waiting => &[Self::Executing, Self::Interrupted],
            Self::Retrying => &[Self::Executing, Self::Failed],
            Self::Interrupted => &[Self::Executing, Self::Failed],
            Self::Validating => &[Self::Completed, Self::Executing, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of a step that finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step_index: usize,
    pub step_id: String,
    pub action_type: String,
    pub result: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(step_index: usize, step: &Step, result: impl Into<String>, attempts: u32) -> Self {
        Self {
            step_index,
            step_id: step.id.clone(),
            action_type: step.action_type.clone(),
            result: result.into(),
            attempts,
            timestamp: Utc::now(),
        }
    }
}

/// A unit of user-requested work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: String,
    pub status: TaskStatus,
    /// Absent until the goal has been interpreted.
    pub outcome: Option<OutcomeDefinition>,
    pub plan: Vec<Step>,
    /// Index of the first step not yet completed; `plan.len()` when done.
    pub current_step_index: usize,
    pub context: Context,
    pub history: Vec<HistoryEntry>,
    /// Present iff `status == Interrupted`.
    pub interrupt_reason: Option<InterruptReason>,
    pub interrupt_data: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task; the goal is stored in the context.
    pub fn new(user_id: impl Into<String>, goal: &str, mut context: Context) -> Self {
        let now = Utc::now();
        context.insert(GOAL_KEY.to_string(), Value::String(goal.trim().to_string()));
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            status: TaskStatus::Pending,
            outcome: None,
            plan: Vec::new(),
            current_step_index: 0,
            context,
            history: Vec::new(),
            interrupt_reason: None,
            interrupt_data: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn goal(&self) -> &str {
        self.context
            .get(GOAL_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Move to `new_status` if the lifecycle table allows it.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
                reason: "transition not allowed by task lifecycle".to_string(),
            });
        }
        tracing::debug!(task_id = %self.id, from = %self.status, to = %new_status, "task transition");
        self.set_status(new_status);
        Ok(())
    }

    /// Bypass the lifecycle table. Only `Failed` and `Interrupted` are reachable this way.
    pub fn force_status(&mut self, new_status: TaskStatus) -> DomainResult<()> {
        if !matches!(new_status, TaskStatus::Failed | TaskStatus::Interrupted) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
                reason: "only failed or interrupted may be forced".to_string(),
            });
        }
        if !self.status.can_transition_to(new_status) {
            tracing::warn!(task_id = %self.id, from = %self.status, to = %new_status, "forcing task status");
        }
        self.set_status(new_status);
        Ok(())
    }

    /// Transition if allowed, otherwise force. Only for `Failed`/`Interrupted`.
    pub fn transition_or_force(&mut self, new_status: TaskStatus) -> DomainResult<()> {
        if self.status.can_transition_to(new_status) {
            self.transition_to(new_status)
        } else {
            self.force_status(new_status)
        }
    }

    fn set_status(&mut self, new_status: TaskStatus) {
        self.status = new_status;
        self.updated_at = Utc::now();
        if new_status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    /// Put the task back to `Pending` so the whole driver can run again.
    pub(crate) fn reset_for_restart(&mut self) {
        self.status = TaskStatus::Pending;
        self.updated_at = Utc::now();
    }

    /// Suspend the task with the interruption's reason and data.
    pub fn interrupt(&mut self, interruption: Interruption) -> DomainResult<()> {
        self.transition_or_force(TaskStatus::Interrupted)?;
        self.interrupt_reason = Some(interruption.reason);
        self.interrupt_data = Some(interruption.data);
        Ok(())
    }

    pub fn clear_interrupt(&mut self) {
        self.interrupt_reason = None;
        self.interrupt_data = None;
    }

    pub fn all_steps_completed(&self) -> bool {
        self.plan.iter().all(Step::is_completed)
    }

    /// Index of the first step that is not completed, or `plan.len()`.
    pub fn first_incomplete_index(&self) -> usize {
        self.plan
            .iter()
            .position(|s| !s.is_completed())
            .unwrap_or(self.plan.len())
    }

    pub fn completed_step_count(&self) -> usize {
        self.plan.iter().filter(|s| s.is_completed()).count()
    }

    pub fn replan_count(&self) -> u64 {
        self.context
            .get(REPLAN_COUNT_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
