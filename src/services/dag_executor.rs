//! DAG Executor service for wave-based parallel step execution.
//!
//! A wave is every step whose dependencies have all completed. The steps of a
//! wave run concurrently through the retry engine; their results are folded
//! back into the task in plan order, and the first step that did not succeed
//! ends the wave. Steps after it in plan order go back to pending unmerged.
//! An interrupted step outranks a failed one wherever it sits in the wave.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult, PendingStep};
use crate::domain::models::{HistoryEntry, Interruption, OrchestratorSettings, Step, Task};
use crate::domain::ports::{ToolOutput, ToolRegistry};
use crate::services::event_bus::{EventBus, ProgressKind};
use crate::services::retry_engine::{RetryEngine, RetryOutcome};

/// Configuration for the DAG executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum concurrent steps per wave.
    pub max_concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

impl From<&OrchestratorSettings> for ExecutorConfig {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            max_concurrency: settings.max_step_concurrency,
        }
    }
}

/// Why a step stopped its wave without an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFailureKind {
    /// The planner should route around the step.
    NeedsReplan,
    /// Every attempt failed; the task cannot go on.
    Exhausted,
}

/// The step that ended a wave.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub step_id: String,
    pub step_index: usize,
    pub error: String,
    pub kind: StepFailureKind,
    pub attempts: u32,
}

/// Result of running one wave (or a whole plan).
#[derive(Debug, Clone)]
pub enum WaveOutcome {
    /// Every executed step completed; ids in plan order.
    Completed { step_ids: Vec<String> },
    Failed(BatchFailure),
    Interrupted {
        step_index: usize,
        interruption: Interruption,
    },
}

/// Executes a task's plan step by step in dependency order.
#[derive(Debug)]
pub struct DagExecutor {
    retry: RetryEngine,
    tools: Arc<ToolRegistry>,
    config: ExecutorConfig,
    events: Option<Arc<EventBus>>,
}

impl DagExecutor {
    pub fn new(retry: RetryEngine, tools: Arc<ToolRegistry>, config: ExecutorConfig) -> Self {
        Self {
            retry,
            tools,
            config,
            events: None,
        }
    }

    /// Publish `step_complete` / `step_failed` events to `events`.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn retry_engine(&self) -> &RetryEngine {
        &self.retry
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run waves until the plan completes or a step stops it.
    ///
    /// `current_step_index` follows the first incomplete step, or the
    /// interrupted step when a wave is interrupted.
    pub async fn execute_plan(&self, task: &mut Task) -> DomainResult<WaveOutcome> {
        let mut step_ids = Vec::new();
        while !task.all_steps_completed() {
            match self.execute_wave(task).await? {
                WaveOutcome::Completed { step_ids: ids } => {
                    step_ids.extend(ids);
                    task.current_step_index = task.first_incomplete_index();
                }
                WaveOutcome::Interrupted {
                    step_index,
                    interruption,
                } => {
                    task.current_step_index = step_index;
                    return Ok(WaveOutcome::Interrupted {
                        step_index,
                        interruption,
                    });
                }
                failed @ WaveOutcome::Failed(_) => return Ok(failed),
            }
        }
        task.current_step_index = task.plan.len();
        Ok(WaveOutcome::Completed { step_ids })
    }

    /// Run every currently ready step of `task` and merge the results.
    pub async fn execute_wave(&self, task: &mut Task) -> DomainResult<WaveOutcome> {
        if task.all_steps_completed() {
            return Ok(WaveOutcome::Completed {
                step_ids: Vec::new(),
            });
        }
        let ready = ready_steps(&task.plan)?;
        debug!(task_id = %task.id, wave_size = ready.len(), "executing wave");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let snapshot = Arc::new(task.context.clone());
        let mut handles = Vec::with_capacity(ready.len());

        for &index in &ready {
            task.plan[index].mark_in_progress();
            let mut step = task.plan[index].clone();

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| DomainError::ExecutionFailed("Step semaphore closed".to_string()))?;
            let retry = self.retry.clone();
            let tools = self.tools.clone();
            let context = snapshot.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let outcome = retry.execute_with_retry(&mut step, &tools, &context).await;
                (step.retry_count, outcome)
            });
            handles.push(handle);
        }

        let joined = join_all(handles).await;
        let mut results = Vec::with_capacity(joined.len());
        for (&index, joined) in ready.iter().zip(joined) {
            let result = match joined {
                Ok(result) => result,
                Err(err) => {
                    warn!(task_id = %task.id, step_id = %task.plan[index].id, error = %err, "step task panicked");
                    (
                        task.plan[index].retry_count,
                        RetryOutcome::Exhausted {
                            error: "step task panicked".to_string(),
                            attempts: 1,
                        },
                    )
                }
            };
            results.push((index, result.0, result.1));
        }

        Ok(self.apply_results(task, results))
    }

    /// Run the single step at `index`, ignoring the rest of the plan.
    ///
    /// Used when a resumed task retries the step it was interrupted on.
    pub async fn execute_step_at(&self, task: &mut Task, index: usize) -> DomainResult<WaveOutcome> {
        if index >= task.plan.len() {
            return Err(DomainError::ExecutionFailed(
                "Step index out of range".to_string(),
            ));
        }
        task.plan[index].mark_in_progress();
        let mut step = task.plan[index].clone();
        let outcome = self
            .retry
            .execute_with_retry(&mut step, &self.tools, &task.context)
            .await;
        Ok(self.apply_results(task, vec![(index, step.retry_count, outcome)]))
    }

    /// Fold results into the task in plan order. `results` must be sorted by index.
    ///
    /// Successes before the first stopping step are merged. An interruption
    /// anywhere in the batch wins over a failure; the failed sibling goes back
    /// to pending and runs again once the task resumes.
    fn apply_results(&self, task: &mut Task, results: Vec<(usize, u32, RetryOutcome)>) -> WaveOutcome {
        let first_stop = results
            .iter()
            .position(|(_, _, outcome)| !matches!(outcome, RetryOutcome::Success { .. }));
        let first_interrupt = results
            .iter()
            .position(|(_, _, outcome)| matches!(outcome, RetryOutcome::Interrupted { .. }));

        let mut step_ids = Vec::new();
        let mut stopped: Option<WaveOutcome> = None;

        for (position, (index, retry_count, outcome)) in results.into_iter().enumerate() {
            task.plan[index].retry_count = retry_count;
            let merges = first_stop.map_or(true, |stop| position < stop);
            let decides = first_interrupt.or(first_stop) == Some(position);

            match outcome {
                RetryOutcome::Success { output, attempts } if merges => {
                    self.merge_success(task, index, output, attempts);
                    step_ids.push(task.plan[index].id.clone());
                }
                RetryOutcome::NeedsReplan { error, attempts } if decides => {
                    stopped = Some(self.fail_step(task, index, error, StepFailureKind::NeedsReplan, attempts));
                }
                RetryOutcome::Exhausted { error, attempts } if decides => {
                    stopped = Some(self.fail_step(task, index, error, StepFailureKind::Exhausted, attempts));
                }
                RetryOutcome::Interrupted { interruption, .. } if decides => {
                    info!(
                        task_id = %task.id,
                        step_id = %task.plan[index].id,
                        reason = %interruption.reason,
                        "step interrupted"
                    );
                    task.plan[index].reset_pending();
                    stopped = Some(WaveOutcome::Interrupted {
                        step_index: index,
                        interruption,
                    });
                }
                RetryOutcome::NeedsReplan { error, .. } | RetryOutcome::Exhausted { error, .. } => {
                    debug!(task_id = %task.id, step_id = %task.plan[index].id, error = %error, "failure superseded by interruption");
                    task.plan[index].reset_pending();
                }
                _ => task.plan[index].reset_pending(),
            }
        }

        task.touch();
        stopped.unwrap_or(WaveOutcome::Completed { step_ids })
    }

    fn merge_success(&self, task: &mut Task, index: usize, output: ToolOutput, attempts: u32) {
        let ToolOutput {
            result,
            context_updates,
            ..
        } = output;
        task.context.extend(context_updates);
        task.plan[index].mark_completed(result);

        let step = &task.plan[index];
        task.history.push(HistoryEntry::new(index, step, "success", attempts));
        info!(task_id = %task.id, step_id = %step.id, action_type = %step.action_type, attempts, "step completed");

        self.emit(
            task,
            ProgressKind::StepComplete {
                step_id: step.id.clone(),
                step: index + 1,
                total_steps: task.plan.len(),
                description: step.description.clone(),
            },
        );
    }

    fn fail_step(
        &self,
        task: &mut Task,
        index: usize,
        error: String,
        kind: StepFailureKind,
        attempts: u32,
    ) -> WaveOutcome {
        task.plan[index].mark_failed(error.clone());
        let step_id = task.plan[index].id.clone();
        warn!(task_id = %task.id, step_id = %step_id, ?kind, attempts, error = %error, "step failed");

        self.emit(
            task,
            ProgressKind::StepFailed {
                step_id: step_id.clone(),
                step: index + 1,
                error: error.clone(),
            },
        );
        WaveOutcome::Failed(BatchFailure {
            step_id,
            step_index: index,
            error,
            kind,
            attempts,
        })
    }

    fn emit(&self, task: &Task, kind: ProgressKind) {
        if let Some(events) = &self.events {
            events.publish(task.id, kind);
        }
    }
}

/// Indices of steps that are not completed and whose dependencies all are.
///
/// An empty wave while steps remain is a deadlock: every pending step is
/// reported together with the dependency ids it is still waiting on, which
/// covers cycles and ids that name no step alike.
pub fn ready_steps(plan: &[Step]) -> DomainResult<Vec<usize>> {
    let completed: HashSet<&str> = plan
        .iter()
        .filter(|s| s.is_completed())
        .map(|s| s.id.as_str())
        .collect();

    let ready: Vec<usize> = plan
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            !s.is_completed() && s.dependencies.iter().all(|d| completed.contains(d.as_str()))
        })
        .map(|(i, _)| i)
        .collect();

    if ready.is_empty() && completed.len() < plan.len() {
        let pending = plan
            .iter()
            .filter(|s| !s.is_completed())
            .map(|s| PendingStep {
                step_id: s.id.clone(),
                unmet: s
                    .dependencies
                    .iter()
                    .filter(|d| !completed.contains(d.as_str()))
                    .cloned()
                    .collect(),
            })
            .collect();
        return Err(DomainError::Deadlock { pending });
    }
    Ok(ready)
}
