//! Domain errors for the Steward orchestration engine.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// A step that could not be scheduled, with the dependency ids it is still waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingStep {
    pub step_id: String,
    pub unmet: Vec<String>,
}

/// Format a deadlock report as `a (unmet: x, y); b (unmet: a)`.
fn format_pending(pending: &[PendingStep]) -> String {
    pending
        .iter()
        .map(|p| format!("{} (unmet: {})", p.step_id, p.unmet.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Domain-level errors that can occur in the Steward system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid goal: {0}")]
    InvalidGoal(String),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Plan deadlocked, no step can run: {}", format_pending(.pending))]
    Deadlock { pending: Vec<PendingStep> },

    #[error("Step {} exhausted all retries: {error}", .step_index + 1)]
    StepExhausted { step_index: usize, error: String },

    #[error("Step {step_id} references unknown context key '{name}'")]
    UnresolvedReference { step_id: String, name: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Collaborator failed: {0}")]
    CollaboratorFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlock_message_lists_every_pending_step() {
        let err = DomainError::Deadlock {
            pending: vec![
                PendingStep { step_id: "a".into(), unmet: vec!["b".into()] },
                PendingStep { step_id: "b".into(), unmet: vec!["a".into(), "ghost".into()] },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Plan deadlocked, no step can run: a (unmet: b); b (unmet: a, ghost)"
        );
    }

    #[test]
    fn test_exhausted_message_is_one_based() {
        let err = DomainError::StepExhausted { step_index: 2, error: "503".into() };
        assert_eq!(err.to_string(), "Step 3 exhausted all retries: 503");
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: DomainError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, DomainError::SerializationError(_)));
    }
}
