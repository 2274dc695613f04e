//! YAML playbooks: a file-driven interpreter, planner and validator.
//!
//! A playbook fixes the outcome and the plan for one kind of goal. The
//! initial plan comes from `steps`; each validation round that needs more
//! work appends `extra_steps` with ids suffixed by the round number.
//!
//! ```yaml
//! outcome:
//!   domain: travel
//!   success_criteria: ["Booking confirmation number obtained"]
//! clarify_if_shorter_than: 4
//! required_context: [booking_confirmation]
//! steps:
//!   - name: search
//!     action: set_context
//!     parameters: { flights: ["NH106"] }
//!     outputs: [flights]
//!   - name: pay
//!     action: request_payment_approval
//!     parameters: { amount: 680 }
//!     depends_on: [search]
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::task::REPLAN_COUNT_KEY;
use crate::domain::models::{
    is_truthy, Context, HistoryEntry, OutcomeDefinition, ParamValue, Step, ValidationReport,
};
use crate::domain::ports::{Interpreter, Planner, Validator};

const DEFAULT_QUESTION: &str = "Could you describe what you need in more detail?";

/// Outcome fields a playbook may fix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeTemplate {
    pub domain: String,
    pub success_criteria: Vec<String>,
    pub validation_method: String,
    pub constraints: Map<String, Value>,
    pub potential_risks: Vec<String>,
    pub requires_human_approval_for: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub action: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default)]
    pub outcome: OutcomeTemplate,
    pub steps: Vec<PlaybookStep>,
    #[serde(default)]
    pub extra_steps: Vec<PlaybookStep>,
    /// Context keys that must be truthy for the outcome to count as reached.
    #[serde(default)]
    pub required_context: Vec<String>,
    /// Ask for clarification when the goal has fewer words than this.
    #[serde(default)]
    pub clarify_if_shorter_than: Option<usize>,
    #[serde(default)]
    pub clarification_question: Option<String>,
    /// Retries for steps that do not set `max_retries`.
    #[serde(default)]
    pub default_max_retries: Option<u32>,
}

const FALLBACK_MAX_RETRIES: u32 = 3;

impl Playbook {
    pub fn from_yaml_str(yaml: &str) -> DomainResult<Self> {
        let playbook: Self = serde_yaml::from_str(yaml)
            .map_err(|e| DomainError::SerializationError(format!("Invalid playbook: {e}")))?;
        playbook.check()?;
        Ok(playbook)
    }

    pub fn load(path: &Path) -> DomainResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            DomainError::ValidationFailed(format!("Cannot read playbook {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Use `max_retries` unless the playbook sets its own default.
    pub fn with_fallback_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries.get_or_insert(max_retries);
        self
    }

    /// Step names must be unique and every step needs an action.
    fn check(&self) -> DomainResult<()> {
        if self.steps.is_empty() {
            return Err(DomainError::ValidationFailed(
                "Playbook must define at least one step".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for step in self.steps.iter().chain(&self.extra_steps) {
            if step.action.trim().is_empty() {
                return Err(DomainError::ValidationFailed(format!(
                    "Playbook step '{}' has no action",
                    step.name
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(DomainError::ValidationFailed(format!(
                    "Duplicate playbook step name '{}'",
                    step.name
                )));
            }
        }
        Ok(())
    }

    /// Build plan steps; in later rounds ids and intra-round dependencies get a `-r{round}` suffix.
    fn build_steps(&self, source: &[PlaybookStep], round: u64) -> Vec<Step> {
        let suffix = |name: &str| {
            if round == 0 {
                name.to_string()
            } else {
                format!("{name}-r{round}")
            }
        };
        let local: HashSet<&str> = source.iter().map(|s| s.name.as_str()).collect();

        source
            .iter()
            .map(|spec| {
                let description = if spec.description.is_empty() {
                    spec.name.clone()
                } else {
                    spec.description.clone()
                };
                let max_retries = spec
                    .max_retries
                    .or(self.default_max_retries)
                    .unwrap_or(FALLBACK_MAX_RETRIES);
                let mut step = Step::new(&spec.action, description)
                    .with_id(suffix(&spec.name))
                    .with_max_retries(max_retries);
                step.parameters = spec
                    .parameters
                    .iter()
                    .map(|(k, v)| (k.clone(), ParamValue::from_json(v.clone())))
                    .collect();
                step.dependencies = spec
                    .depends_on
                    .iter()
                    .map(|dep| {
                        if local.contains(dep.as_str()) {
                            suffix(dep)
                        } else {
                            dep.clone()
                        }
                    })
                    .collect();
                step.outputs.clone_from(&spec.outputs);
                step
            })
            .collect()
    }
}

#[async_trait]
impl Interpreter for Playbook {
    async fn interpret(&self, goal: &str, context: &Context) -> DomainResult<OutcomeDefinition> {
        let answered = context.get("clarification_answer").is_some_and(is_truthy);
        if let Some(min_words) = self.clarify_if_shorter_than {
            if !answered && goal.split_whitespace().count() < min_words {
                let question = self.clarification_question.as_deref().unwrap_or(DEFAULT_QUESTION);
                let mut outcome = OutcomeDefinition::needing_clarification(goal, question);
                outcome.domain.clone_from(&self.outcome.domain);
                return Ok(outcome);
            }
        }

        let template = &self.outcome;
        let mut outcome = OutcomeDefinition::new(goal, &template.domain);
        outcome.success_criteria.clone_from(&template.success_criteria);
        outcome.validation_method.clone_from(&template.validation_method);
        outcome.constraints.clone_from(&template.constraints);
        outcome.potential_risks.clone_from(&template.potential_risks);
        outcome
            .requires_human_approval_for
            .clone_from(&template.requires_human_approval_for);
        Ok(outcome)
    }
}

#[async_trait]
impl Planner for Playbook {
    async fn create_plan(&self, _outcome: &OutcomeDefinition, context: &Context) -> DomainResult<Vec<Step>> {
        let round = context.get(REPLAN_COUNT_KEY).and_then(Value::as_u64).unwrap_or(0);
        if round == 0 {
            Ok(self.build_steps(&self.steps, 0))
        } else {
            Ok(self.build_steps(&self.extra_steps, round))
        }
    }
}

#[async_trait]
impl Validator for Playbook {
    async fn validate(
        &self,
        _outcome: &OutcomeDefinition,
        context: &Context,
        history: &[HistoryEntry],
    ) -> DomainResult<ValidationReport> {
        let mut criteria_results = Map::new();
        let mut failed = Vec::new();
        for key in &self.required_context {
            let present = context.get(key).is_some_and(is_truthy);
            criteria_results.insert(key.clone(), json!(present));
            if !present {
                failed.push(key.clone());
            }
        }

        let mut report = if failed.is_empty() {
            ValidationReport::complete(1.0)
        } else {
            let met = self.required_context.len() - failed.len();
            let mut report = if self.extra_steps.is_empty() {
                ValidationReport::default()
            } else {
                ValidationReport::needs_more_work(failed.clone())
            };
            report.failed_criteria = failed;
            report.confidence = met as f64 / self.required_context.len() as f64;
            report.recommendations = vec![format!("{} steps ran; missing results remain", history.len())];
            report
        };
        report.criteria_results = criteria_results;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ParamValue, StepStatus};

    const YAML: &str = r#"
outcome:
  domain: travel
  success_criteria: ["Booking confirmation number obtained"]
clarify_if_shorter_than: 4
clarification_question: "Where would you like to go and when?"
required_context: [booking_confirmation]
steps:
  - name: search
    action: set_context
    parameters: { flights: ["NH106"] }
    outputs: [flights]
  - name: pay
    description: Approve payment
    action: request_payment_approval
    parameters: { amount: 680, options: "{{flights}}" }
    depends_on: [search]
    max_retries: 1
extra_steps:
  - name: confirm
    action: set_context
    parameters: { booking_confirmation: "ABC123" }
  - name: email
    action: set_context
    parameters: { emailed: true }
    depends_on: [confirm, pay]
"#;

    fn playbook() -> Playbook {
        Playbook::from_yaml_str(YAML).unwrap()
    }

    #[tokio::test]
    async fn test_short_goal_needs_clarification() {
        let pb = playbook();
        let outcome = pb.interpret("Tokyo trip", &Context::new()).await.unwrap();
        assert!(outcome.needs_clarification());
        assert_eq!(outcome.clarification_question(), "Where would you like to go and when?");

        let mut ctx = Context::new();
        ctx.insert("clarification_answer".into(), json!("Next Friday, morning flight"));
        let outcome = pb.interpret("Tokyo trip", &ctx).await.unwrap();
        assert!(!outcome.needs_clarification());
        assert_eq!(outcome.domain, "travel");
    }

    #[tokio::test]
    async fn test_initial_plan() {
        let pb = playbook();
        let outcome = OutcomeDefinition::new("g", "travel");
        let plan = pb.create_plan(&outcome, &Context::new()).await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].id, "pay");
        assert_eq!(plan[1].dependencies, vec!["search".to_string()]);
        assert_eq!(plan[1].max_retries, 1);
        assert_eq!(plan[0].max_retries, 3);
        assert_eq!(plan[1].parameters["options"], ParamValue::Ref("flights".into()));
        assert_eq!(plan[0].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_extra_steps_are_suffixed_per_round() {
        let pb = playbook();
        let outcome = OutcomeDefinition::new("g", "travel");
        let mut ctx = Context::new();
        ctx.insert(REPLAN_COUNT_KEY.into(), json!(2));
        let plan = pb.create_plan(&outcome, &ctx).await.unwrap();
        assert_eq!(plan[0].id, "confirm-r2");
        assert_eq!(plan[1].dependencies, vec!["confirm-r2".to_string(), "pay".to_string()]);
    }

    #[tokio::test]
    async fn test_validator_requires_context() {
        let pb = playbook();
        let outcome = OutcomeDefinition::new("g", "travel");
        let report = pb.validate(&outcome, &Context::new(), &[]).await.unwrap();
        assert!(!report.completed);
        assert!(report.needs_more_work);
        assert_eq!(report.failed_criteria, vec!["booking_confirmation".to_string()]);

        let mut ctx = Context::new();
        ctx.insert("booking_confirmation".into(), json!("ABC123"));
        let report = pb.validate(&outcome, &ctx, &[]).await.unwrap();
        assert!(report.completed);
        assert_eq!(report.criteria_results["booking_confirmation"], json!(true));
    }

    #[tokio::test]
    async fn test_fallback_retries_do_not_override_playbook() {
        let outcome = OutcomeDefinition::new("g", "travel");
        let pb = playbook().with_fallback_max_retries(5);
        let plan = pb.create_plan(&outcome, &Context::new()).await.unwrap();
        assert_eq!(plan[0].max_retries, 5);
        assert_eq!(plan[1].max_retries, 1);

        let yaml = format!("default_max_retries: 0\n{YAML}");
        let pb = Playbook::from_yaml_str(&yaml).unwrap().with_fallback_max_retries(5);
        let plan = pb.create_plan(&outcome, &Context::new()).await.unwrap();
        assert_eq!(plan[0].max_retries, 0);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = "steps:\n  - {name: a, action: fail}\n  - {name: a, action: fail}\n";
        let err = Playbook::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate playbook step name 'a'"));
    }
}
