use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use steward::domain::models::{Context, Step, Task, TaskStatus};
use steward::services::dag_executor::ready_steps;
use steward::services::{CircuitBreakerService, RetryEngine, RetryPolicy, RetryStrategy};

/// The lifecycle table, written out independently of the model.
fn allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Analyzing)
            | (Analyzing, Planning | Interrupted | Failed)
            | (Planning, Executing | Interrupted | Failed)
            | (Executing, Waiting | Retrying | Validating | Interrupted | Failed)
            | (Waiting, Executing | Interrupted)
            | (Retrying, Executing | Failed)
            | (Interrupted, Executing | Failed)
            | (Validating, Completed | Executing | Failed)
    )
}

fn any_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn task_in(status: TaskStatus) -> Task {
    let mut task = Task::new("prop", "Property based lifecycle check", Context::new());
    task.status = status;
    task
}

/// Acyclic plan: step `i` may only depend on steps before it; listed in shuffled order.
fn acyclic_plan() -> impl Strategy<Value = Vec<Step>> {
    (1usize..24)
        .prop_flat_map(|size| {
            let deps = (0..size)
                .map(|i| prop::collection::vec(0..i.max(1), 0..=i.min(3)))
                .collect::<Vec<_>>();
            (deps, Just((0..size).collect::<Vec<_>>()).prop_shuffle())
        })
        .prop_map(|(deps, order)| {
            let steps: Vec<Step> = deps
                .into_iter()
                .enumerate()
                .map(|(i, parents)| {
                    let unique: HashSet<usize> = parents.into_iter().filter(|&p| p < i).collect();
                    unique.into_iter().fold(
                        Step::new("noop", format!("step {i}")).with_id(format!("s{i}")),
                        |step, p| step.with_dependency(format!("s{p}")),
                    )
                })
                .collect();
            order.into_iter().map(|i| steps[i].clone()).collect()
        })
}

proptest! {
    /// Property: a transition succeeds exactly when the table allows it,
    /// and a rejected transition leaves the status untouched.
    #[test]
    fn prop_transition_matches_table(from in any_status(), to in any_status()) {
        let mut task = task_in(from);
        let result = task.transition_to(to);

        prop_assert_eq!(result.is_ok(), allowed(from, to));
        prop_assert_eq!(from.can_transition_to(to), allowed(from, to));
        if result.is_ok() {
            prop_assert_eq!(task.status, to);
        } else {
            prop_assert_eq!(task.status, from);
        }
    }

    /// Property: random walks never leave a terminal status.
    #[test]
    fn prop_terminal_is_absorbing(walk in prop::collection::vec(any_status(), 1..40)) {
        let mut task = task_in(TaskStatus::Pending);
        let mut terminal_seen = None;
        for next in walk {
            let _ = task.transition_to(next);
            if let Some(terminal) = terminal_seen {
                prop_assert_eq!(task.status, terminal);
            } else if task.status.is_terminal() {
                terminal_seen = Some(task.status);
                prop_assert!(task.completed_at.is_some());
            }
        }
    }

    /// Property: waves drain every acyclic plan and never start a step
    /// before all of its dependencies completed.
    #[test]
    fn prop_waves_respect_dependencies(mut plan in acyclic_plan()) {
        let mut done: HashSet<String> = HashSet::new();
        let mut waves = 0;
        while done.len() < plan.len() {
            let ready = ready_steps(&plan).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(!ready.is_empty());
            for &index in &ready {
                for dep in &plan[index].dependencies {
                    prop_assert!(done.contains(dep), "{} ran before {}", plan[index].id, dep);
                }
            }
            for index in ready {
                plan[index].mark_completed(json!(null));
                done.insert(plan[index].id.clone());
            }
            waves += 1;
            prop_assert!(waves <= plan.len());
        }
        prop_assert!(ready_steps(&plan).map_err(|e| TestCaseError::fail(e.to_string()))?.is_empty());
    }

    /// Property: exponential backoff stays within 25% of base * 2^attempt.
    #[test]
    fn prop_exponential_delay_bounds(attempt in 0u32..8) {
        let engine = RetryEngine::new(RetryPolicy::default(), Arc::new(CircuitBreakerService::default()));
        let nominal = 2.0 * 2f64.powi(attempt as i32);
        let delay = engine.calculate_delay(RetryStrategy::Exponential, attempt).as_secs_f64();

        prop_assert!(delay >= nominal * 0.75 - 1e-9, "delay {delay} below bound for attempt {attempt}");
        prop_assert!(delay <= nominal * 1.25 + 1e-9, "delay {delay} above bound for attempt {attempt}");
    }

    /// Property: without jitter the delay is base * 2^attempt.
    #[test]
    fn prop_exponential_without_jitter_is_exact(attempt in 0u32..8, base_ms in 1u64..5000) {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let engine = RetryEngine::new(policy, Arc::new(CircuitBreakerService::default()));
        let delay = engine.calculate_delay(RetryStrategy::Exponential, attempt);
        let expected = Duration::from_millis(base_ms * 2u64.pow(attempt));
        prop_assert!(delay.abs_diff(expected) < Duration::from_micros(1));
    }
}
