//! Human-in-the-loop interruptions.
//!
//! An interruption is not an error: it is the value a tool, the retry engine,
//! or the orchestrator hands back when execution cannot proceed without
//! external input. The task is suspended until `resume` is called.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Why a task was suspended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InterruptReason {
    /// A payment needs the user's approval and payment method.
    PaymentRequired,
    /// An action needs explicit sign-off.
    ApprovalNeeded,
    /// The goal or a failed step needs more information from the user.
    ClarificationNeeded,
    /// A step failure was escalated to a human.
    StepFailed,
    /// Any reason the core has no special resume handling for.
    Other(String),
}

impl InterruptReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PaymentRequired => "payment_required",
            Self::ApprovalNeeded => "approval_needed",
            Self::ClarificationNeeded => "clarification_needed",
            Self::StepFailed => "step_failed",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for InterruptReason {
    fn from(s: String) -> Self {
        match s.as_str() {
            "payment_required" => Self::PaymentRequired,
            "approval_needed" => Self::ApprovalNeeded,
            "clarification_needed" => Self::ClarificationNeeded,
            "step_failed" => Self::StepFailed,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for InterruptReason {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<InterruptReason> for String {
    fn from(reason: InterruptReason) -> Self {
        reason.as_str().to_string()
    }
}

impl std::fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal that a task must pause for external input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interruption {
    pub reason: InterruptReason,
    /// Structured prompt data (amount, approver, question, ...).
    pub data: Value,
}

impl Interruption {
    pub fn new(reason: impl Into<InterruptReason>, data: Value) -> Self {
        Self { reason: reason.into(), data }
    }

    pub fn clarification(question: impl Into<String>) -> Self {
        Self::new(
            InterruptReason::ClarificationNeeded,
            json!({ "question": question.into() }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_trips_through_strings() {
        for reason in [
            InterruptReason::PaymentRequired,
            InterruptReason::ApprovalNeeded,
            InterruptReason::ClarificationNeeded,
            InterruptReason::StepFailed,
            InterruptReason::Other("vendor_callback".into()),
        ] {
            let s: String = reason.clone().into();
            assert_eq!(InterruptReason::from(s), reason);
        }
    }

    #[test]
    fn test_reason_serializes_as_plain_string() {
        let json = serde_json::to_value(InterruptReason::PaymentRequired).unwrap();
        assert_eq!(json, serde_json::json!("payment_required"));
    }
}
