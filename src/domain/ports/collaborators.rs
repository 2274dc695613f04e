//! Collaborator ports consumed by the orchestrator.
//!
//! The engine never decides what a goal means, which steps achieve it, or
//! whether the result is good enough. Those judgements come from these traits.

use async_trait::async_trait;
use serde_json::json;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Context, HistoryEntry, OutcomeDefinition, ParamValue, Step, StepStatus, ValidationReport,
};

/// Action type of the step inserted when a failed step needs a human.
pub const REQUEST_USER_HELP: &str = "request_user_help";

/// Turns a free-text goal into a measurable outcome.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Return an outcome, or one with `needs_clarification` set and a question.
    async fn interpret(&self, goal: &str, context: &Context) -> DomainResult<OutcomeDefinition>;
}

/// Produces and repairs plans.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(
        &self,
        outcome: &OutcomeDefinition,
        context: &Context,
    ) -> DomainResult<Vec<Step>>;

    /// Successor plan after the step at `failed_index` needs an alternative.
    ///
    /// Completed steps are kept verbatim. The default replaces the failed step
    /// with a `request_user_help` step and rewires dependents onto it.
    async fn replan(
        &self,
        plan: &[Step],
        failed_index: usize,
        error: &str,
    ) -> DomainResult<Vec<Step>> {
        replace_with_user_help(plan, failed_index, error)
    }
}

/// Judges whether the outcome was reached.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        outcome: &OutcomeDefinition,
        context: &Context,
        history: &[HistoryEntry],
    ) -> DomainResult<ValidationReport>;
}

/// Replace `plan[failed_index]` with a user-help step.
pub fn replace_with_user_help(
    plan: &[Step],
    failed_index: usize,
    error: &str,
) -> DomainResult<Vec<Step>> {
    let failed = plan.get(failed_index).ok_or_else(|| {
        DomainError::ValidationFailed(format!("replan index {failed_index} out of range"))
    })?;
    let prefix = &plan[..failed_index];

    let mut help = Step::new(
        REQUEST_USER_HELP,
        format!("Ask user for valid inputs to proceed. Error: {error}"),
    )
    .with_max_retries(2);
    // Literals only: error text and old templates must not be re-resolved.
    for (key, value) in [
        ("error", json!(error)),
        ("step_description", json!(failed.description)),
        ("original_params", json!(failed.parameters)),
    ] {
        help.parameters.insert(key.to_string(), ParamValue::Literal(value));
    }
    if let Some(last_done) = prefix.iter().rev().find(|s| s.status == StepStatus::Completed) {
        help.dependencies.push(last_done.id.clone());
    }

    let help_id = help.id.clone();
    let mut new_plan = prefix.to_vec();
    new_plan.push(help);
    new_plan.extend(plan[failed_index + 1..].iter().cloned().map(|mut step| {
        for dep in &mut step.dependencies {
            if *dep == failed.id {
                dep.clone_from(&help_id);
            }
        }
        step
    }));
    Ok(new_plan)
}
