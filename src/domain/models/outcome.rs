//! Outcome and validation models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Constraint key that asks the orchestrator to pause for clarification.
pub const NEEDS_CLARIFICATION: &str = "needs_clarification";
/// Constraint key carrying the clarification question.
pub const CLARIFICATION_QUESTION: &str = "clarification_question";

/// The measurable definition of "done" for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDefinition {
    pub original_goal: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub validation_method: String,
    #[serde(default)]
    pub domain: String,
    pub deadline: Option<DateTime<Utc>>,
    /// Budget, timeframe, clarification flags and the like.
    #[serde(default)]
    pub constraints: Map<String, Value>,
    #[serde(default)]
    pub potential_risks: Vec<String>,
    #[serde(default)]
    pub requires_human_approval_for: Vec<String>,
}

impl OutcomeDefinition {
    pub fn new(original_goal: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            original_goal: original_goal.into(),
            success_criteria: Vec::new(),
            validation_method: String::new(),
            domain: domain.into(),
            deadline: None,
            constraints: Map::new(),
            potential_risks: Vec::new(),
            requires_human_approval_for: Vec::new(),
        }
    }

    /// An outcome that only asks the user a question.
    pub fn needing_clarification(
        original_goal: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        let mut outcome = Self::new(original_goal, "unknown");
        outcome
            .constraints
            .insert(NEEDS_CLARIFICATION.to_string(), Value::Bool(true));
        outcome
            .constraints
            .insert(CLARIFICATION_QUESTION.to_string(), Value::String(question.into()));
        outcome
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }

    pub fn needs_clarification(&self) -> bool {
        self.constraints
            .get(NEEDS_CLARIFICATION)
            .is_some_and(is_truthy)
    }

    pub fn clarification_question(&self) -> String {
        self.constraints
            .get(CLARIFICATION_QUESTION)
            .and_then(Value::as_str)
            .unwrap_or("Could you provide more details about what you need?")
            .to_string()
    }
}

/// Loose truthiness for JSON values coming from collaborators.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Verdict returned by a validator after all steps have run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValidationReport {
    pub completed: bool,
    pub confidence: f64,
    #[serde(default)]
    pub needs_more_work: bool,
    #[serde(default)]
    pub failed_criteria: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub criteria_results: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub forced_completion: bool,
}

impl ValidationReport {
    pub fn complete(confidence: f64) -> Self {
        Self { completed: true, confidence, ..Self::default() }
    }

    pub fn needs_more_work(failed_criteria: Vec<String>) -> Self {
        Self { needs_more_work: true, failed_criteria, ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clarification_flag() {
        let outcome = OutcomeDefinition::needing_clarification("book", "Where to?");
        assert!(outcome.needs_clarification());
        assert_eq!(outcome.clarification_question(), "Where to?");
        assert!(!OutcomeDefinition::new("book a flight", "travel").needs_clarification());
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!(1)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&Value::Null));
    }
}
