//! Orchestrator service.
//!
//! Drives a task through its lifecycle: interpret the goal, plan, execute the
//! plan wave by wave, validate, and replan when the validator asks for more
//! work. Interruptions suspend the task until [`Orchestrator::resume`] feeds
//! the user's response back in.
//!
//! Every collaborator is injected; runs are executed by the worker pool so the
//! public API returns as soon as the task state is persisted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::summary::{FAILURE_REASON_KEY, FINAL_RESULT_KEY, VALIDATION_RESULT_KEY};
use crate::domain::models::task::{GOAL_KEY, REPLAN_COUNT_KEY};
use crate::domain::models::{
    build_result_summary, is_truthy, Context, HistoryEntry, InterruptReason, Interruption,
    OrchestratorSettings, Task, TaskResultView, TaskStatus, ValidationReport,
};
use crate::domain::ports::{Interpreter, Planner, TaskRepository, Validator, REQUEST_USER_HELP};
use crate::services::circuit_breaker::CircuitStats;
use crate::services::dag_executor::{DagExecutor, StepFailureKind, WaveOutcome};
use crate::services::event_bus::{EventBus, ProgressKind, TaskSubscription};
use crate::services::param_resolver::validate_plan;
use crate::services::task_worker::{TaskQueue, TaskRun, TaskRunKind, TaskRunner, TaskWorkerPool};

const FORCED_COMPLETION_NOTE: &str = "Forced completion after max replan attempts";
const RUN_QUEUE_CAPACITY: usize = 128;

/// The judgement-making collaborators of an orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub interpreter: Arc<dyn Interpreter>,
    pub planner: Arc<dyn Planner>,
    pub validator: Arc<dyn Validator>,
}

/// Reply to a resume request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResumeResponse {
    fn resumed() -> Self {
        Self {
            success: true,
            status: Some("resumed".to_string()),
            error: None,
        }
    }

    fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            status: None,
            error: Some(error.into()),
        }
    }
}

/// Where a drive of the task stopped.
#[derive(Debug)]
enum Progress {
    Completed,
    Interrupted(Interruption),
    Failed(String),
}

/// Task lifecycle driver.
pub struct Orchestrator {
    store: Arc<dyn TaskRepository>,
    collaborators: Collaborators,
    executor: Arc<DagExecutor>,
    events: Arc<EventBus>,
    settings: OrchestratorSettings,
    queue: TaskQueue,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskRepository>,
        collaborators: Collaborators,
        executor: Arc<DagExecutor>,
        events: Arc<EventBus>,
        settings: OrchestratorSettings,
        queue: TaskQueue,
    ) -> Self {
        Self {
            store,
            collaborators,
            executor,
            events,
            settings,
            queue,
        }
    }

    /// Build an orchestrator together with its worker pool.
    ///
    /// The pool stops once the returned orchestrator is dropped.
    pub fn start(
        store: Arc<dyn TaskRepository>,
        collaborators: Collaborators,
        executor: Arc<DagExecutor>,
        events: Arc<EventBus>,
        settings: OrchestratorSettings,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (queue, pool) = TaskWorkerPool::channel(RUN_QUEUE_CAPACITY, settings.max_concurrent_tasks);
        let pool = pool.with_events(Arc::clone(&events));
        let orchestrator = Arc::new(Self::new(store, collaborators, executor, events, settings, queue));
        let runner: Weak<dyn TaskRunner> = Arc::downgrade(&orchestrator) as Weak<dyn TaskRunner>;
        let handle = pool.spawn(runner);
        (orchestrator, handle)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // ========================================================================
    // Presentation-facing API
    // ========================================================================

    /// Validate the goal, persist a pending task and queue its first run.
    pub async fn create_task(&self, user_id: &str, goal: &str, context: Context) -> DomainResult<Uuid> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(DomainError::InvalidGoal(
                "Goal cannot be empty. Please describe what you need done.".to_string(),
            ));
        }
        if goal.chars().count() < self.settings.min_goal_length {
            return Err(DomainError::InvalidGoal(
                "Please provide more details about what you need done.".to_string(),
            ));
        }

        let task = Task::new(user_id, goal, context);
        self.store.save(&task).await?;
        info!(task_id = %task.id, user_id, "task created");
        self.queue.enqueue(TaskRun::start(task.id)).await?;
        Ok(task.id)
    }

    pub async fn get_status(&self, task_id: Uuid) -> DomainResult<Option<Task>> {
        self.store.load(task_id).await
    }

    pub async fn list_tasks(&self) -> DomainResult<Vec<Task>> {
        self.store.list_all().await
    }

    pub async fn delete_task(&self, task_id: Uuid) -> DomainResult<()> {
        self.store.delete(task_id).await?;
        info!(task_id = %task_id, "task deleted");
        Ok(())
    }

    /// Final result of a finished task.
    pub async fn get_result(&self, task_id: Uuid) -> DomainResult<TaskResultView> {
        let task = self.load(task_id).await?;
        TaskResultView::finished(&task)
    }

    pub async fn circuit_status(&self) -> Vec<CircuitStats> {
        self.executor.retry_engine().breaker().stats().await
    }

    pub fn subscribe(&self, task_id: Uuid) -> TaskSubscription {
        self.events.subscribe_task(task_id)
    }

    /// Feed the user's response to an interrupted task and queue its continuation.
    ///
    /// The updated task is written only if nobody saved it after it was
    /// loaded, so of two concurrent resumes exactly one is accepted.
    #[instrument(skip(self, response), fields(task_id = %task_id))]
    pub async fn resume(&self, task_id: Uuid, response: Value) -> DomainResult<ResumeResponse> {
        let Some(seen) = self.store.load(task_id).await? else {
            return Ok(ResumeResponse::rejected("Task not found"));
        };
        if seen.status != TaskStatus::Interrupted {
            return Ok(not_interrupted(seen.status));
        }
        let mut task = seen.clone();

        info!(reason = ?task.interrupt_reason, "resuming task");
        task.context.insert("user_response".to_string(), response.clone());
        let approved = response.get("approved").is_some_and(is_truthy);
        let reason = task
            .interrupt_reason
            .clone()
            .unwrap_or_else(|| InterruptReason::Other("unknown".to_string()));
        let mut retry_step = None;

        match reason {
            InterruptReason::PaymentRequired if approved => {
                let method = response
                    .get("payment_method")
                    .and_then(Value::as_str)
                    .unwrap_or("default")
                    .to_string();
                task.context.insert("user_payment_method".to_string(), json!(method));
                task.context.insert("payment_approved".to_string(), json!(true));
                complete_current_step(&mut task, json!({"approved": true, "method": method}));
            }
            InterruptReason::PaymentRequired => {
                return self.decline(task, &seen, "Payment declined by user", "Payment declined").await;
            }
            InterruptReason::ApprovalNeeded if approved => {
                task.context.insert("approval_response".to_string(), response.clone());
                task.context.insert("approval_received".to_string(), json!(true));
                complete_current_step(&mut task, json!({"approved": true}));
            }
            InterruptReason::ApprovalNeeded => {
                return self.decline(task, &seen, "Approval denied by user", "Approval denied").await;
            }
            InterruptReason::ClarificationNeeded => {
                let answer = response.get("answer").cloned().unwrap_or(Value::Null);
                let answer_text = match &answer {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                task.context.insert("clarification_answer".to_string(), answer.clone());
                let goal = format!("{} - Additional info: {answer_text}", task.goal());
                task.context.insert(GOAL_KEY.to_string(), json!(goal));

                let on_help_step = task
                    .plan
                    .get(task.current_step_index)
                    .is_some_and(|step| step.action_type == REQUEST_USER_HELP);
                if on_help_step {
                    complete_current_step(&mut task, json!({"user_response": answer}));
                }
            }
            InterruptReason::StepFailed => {
                merge_response(&mut task.context, &response);
                retry_step = (task.current_step_index < task.plan.len()).then_some(task.current_step_index);
            }
            InterruptReason::Other(_) => merge_response(&mut task.context, &response),
        }

        task.clear_interrupt();
        let run = if task.plan.is_empty() {
            task.reset_for_restart();
            TaskRun::start(task_id)
        } else {
            task.transition_to(TaskStatus::Executing)?;
            TaskRun::resume(task_id, retry_step)
        };
        if !self.store.save_if_unchanged(&task, &seen).await? {
            return self.resume_lost(task_id).await;
        }
        self.events.publish(task_id, ProgressKind::StatusChange { status: task.status });
        self.queue.enqueue(run).await?;
        Ok(ResumeResponse::resumed())
    }

    /// Fail an interrupted task the user refused, unless another resume won.
    async fn decline(&self, mut task: Task, seen: &Task, reason: &str, reply: &str) -> DomainResult<ResumeResponse> {
        mark_failed(&mut task, reason)?;
        if !self.store.save_if_unchanged(&task, seen).await? {
            return self.resume_lost(task.id).await;
        }
        self.events.publish(
            task.id,
            ProgressKind::Failed {
                error: reason.to_string(),
            },
        );
        Ok(ResumeResponse::rejected(reply))
    }

    async fn resume_lost(&self, task_id: Uuid) -> DomainResult<ResumeResponse> {
        warn!(task_id = %task_id, "task changed while resuming, response discarded");
        Ok(match self.store.load(task_id).await? {
            Some(current) if current.status != TaskStatus::Interrupted => not_interrupted(current.status),
            Some(_) => ResumeResponse::rejected("Task was resumed concurrently"),
            None => ResumeResponse::rejected("Task not found"),
        })
    }

    // ========================================================================
    // Drivers
    // ========================================================================

    /// Execute `run` inline until the task settles.
    pub async fn run_to_settlement(&self, run: TaskRun) -> DomainResult<TaskStatus> {
        match run.kind {
            TaskRunKind::Start => self.process_task(run.task_id).await,
            TaskRunKind::Resume { retry_step } => self.continue_execution(run.task_id, retry_step).await,
        }
    }

    /// Full drive of a pending task.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn process_task(&self, task_id: Uuid) -> DomainResult<TaskStatus> {
        let mut task = self.load(task_id).await?;
        if task.status != TaskStatus::Pending {
            warn!(status = %task.status, "task is not pending, skipping run");
            return Ok(task.status);
        }
        let progress = match self.analyze_and_plan(&mut task).await {
            Ok(None) => self.execute(&mut task, None).await,
            Ok(Some(interruption)) => Ok(Progress::Interrupted(interruption)),
            Err(err) => Err(err),
        };
        self.settle(&mut task, progress).await
    }

    /// Continue an executing task from `current_step_index`.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn continue_execution(&self, task_id: Uuid, retry_step: Option<usize>) -> DomainResult<TaskStatus> {
        let mut task = self.load(task_id).await?;
        if task.status != TaskStatus::Executing {
            warn!(status = %task.status, "task is not executing, skipping run");
            return Ok(task.status);
        }
        info!(
            from_step = task.current_step_index + 1,
            total_steps = task.plan.len(),
            "continuing execution"
        );
        let progress = self.execute(&mut task, retry_step).await;
        self.settle(&mut task, progress).await
    }

    /// Interpret and plan. Returns an interruption when the goal needs clarifying.
    async fn analyze_and_plan(&self, task: &mut Task) -> DomainResult<Option<Interruption>> {
        self.transition(task, TaskStatus::Analyzing).await?;
        let outcome = self
            .collaborators
            .interpreter
            .interpret(task.goal(), &task.context)
            .await?;
        if outcome.needs_clarification() {
            let question = outcome.clarification_question();
            task.outcome = Some(outcome);
            return Ok(Some(Interruption::clarification(question)));
        }

        self.transition(task, TaskStatus::Planning).await?;
        let plan = self.collaborators.planner.create_plan(&outcome, &task.context).await?;
        validate_plan(&plan, &task.context)?;
        info!(task_id = %task.id, steps = plan.len(), domain = %outcome.domain, "plan created");

        task.outcome = Some(outcome);
        task.plan = plan;
        task.current_step_index = 0;
        self.transition(task, TaskStatus::Executing).await?;
        Ok(None)
    }

    /// Run waves and validation rounds until the task completes or stops.
    async fn execute(&self, task: &mut Task, retry_step: Option<usize>) -> DomainResult<Progress> {
        if let Some(index) = retry_step {
            debug!(task_id = %task.id, step = index + 1, "retrying interrupted step");
            let outcome = self.executor.execute_step_at(task, index).await?;
            if let Some(progress) = self.handle_wave(task, outcome).await? {
                return Ok(progress);
            }
        }

        loop {
            while !task.all_steps_completed() {
                let outcome = self.executor.execute_wave(task).await?;
                if let Some(progress) = self.handle_wave(task, outcome).await? {
                    return Ok(progress);
                }
            }
            task.current_step_index = task.plan.len();

            if let Some(progress) = self.validate(task).await? {
                return Ok(progress);
            }
        }
    }

    async fn handle_wave(&self, task: &mut Task, outcome: WaveOutcome) -> DomainResult<Option<Progress>> {
        match outcome {
            WaveOutcome::Completed { .. } => {
                task.current_step_index = task.first_incomplete_index();
                self.store.save(task).await?;
                Ok(None)
            }
            WaveOutcome::Failed(failure) => match failure.kind {
                StepFailureKind::NeedsReplan => {
                    let plan = self
                        .collaborators
                        .planner
                        .replan(&task.plan, failure.step_index, &failure.error)
                        .await?;
                    validate_plan(&plan, &task.context)?;
                    info!(
                        task_id = %task.id,
                        failed_step = %failure.step_id,
                        steps = plan.len(),
                        "plan revised after step failure"
                    );
                    task.plan = plan;
                    task.touch();
                    self.store.save(task).await?;
                    Ok(None)
                }
                StepFailureKind::Exhausted => Err(DomainError::StepExhausted {
                    step_index: failure.step_index,
                    error: failure.error,
                }),
            },
            WaveOutcome::Interrupted {
                step_index,
                interruption,
            } => {
                task.current_step_index = step_index;
                Ok(Some(Progress::Interrupted(interruption)))
            }
        }
    }

    /// One validation round. `None` means more steps were planned.
    async fn validate(&self, task: &mut Task) -> DomainResult<Option<Progress>> {
        self.transition(task, TaskStatus::Validating).await?;
        let outcome = task
            .outcome
            .clone()
            .ok_or_else(|| DomainError::ExecutionFailed("Task has no outcome definition".to_string()))?;
        let report = self
            .collaborators
            .validator
            .validate(&outcome, &task.context, &task.history)
            .await?;
        debug!(
            task_id = %task.id,
            completed = report.completed,
            confidence = report.confidence,
            needs_more_work = report.needs_more_work,
            "validation finished"
        );

        if report.completed {
            self.complete(task, report)?;
            return Ok(Some(Progress::Completed));
        }

        let rounds = task.replan_count();
        if rounds >= self.settings.max_replans {
            warn!(task_id = %task.id, rounds, "replan ceiling reached, forcing completion");
            let report = ValidationReport {
                note: Some(FORCED_COMPLETION_NOTE.to_string()),
                forced_completion: true,
                ..report
            };
            self.complete(task, report)?;
            return Ok(Some(Progress::Completed));
        }

        if !report.needs_more_work {
            return Ok(Some(Progress::Failed(
                "Validation failed and cannot replan".to_string(),
            )));
        }

        task.context.insert(REPLAN_COUNT_KEY.to_string(), json!(rounds + 1));
        let extra = self.collaborators.planner.create_plan(&outcome, &task.context).await?;
        let mut plan = task.plan.clone();
        plan.extend(extra);
        validate_plan(&plan, &task.context)?;
        info!(
            task_id = %task.id,
            round = rounds + 1,
            failed_criteria = ?report.failed_criteria,
            new_steps = plan.len() - task.plan.len(),
            "validation needs more work, extending plan"
        );
        task.plan = plan;
        task.current_step_index = task.first_incomplete_index();
        self.transition(task, TaskStatus::Executing).await?;
        Ok(None)
    }

    fn complete(&self, task: &mut Task, report: ValidationReport) -> DomainResult<()> {
        task.transition_to(TaskStatus::Completed)?;
        let summary = build_result_summary(task);
        let validation = serde_json::to_value(&report)?;
        task.context.insert(FINAL_RESULT_KEY.to_string(), summary);
        task.context.insert(VALIDATION_RESULT_KEY.to_string(), validation);
        Ok(())
    }

    /// Persist where the drive stopped and publish the matching event.
    async fn settle(&self, task: &mut Task, progress: DomainResult<Progress>) -> DomainResult<TaskStatus> {
        match progress {
            Ok(Progress::Completed) => {
                self.store.save(task).await?;
                info!(task_id = %task.id, steps = task.plan.len(), "task completed");
                self.events.publish(
                    task.id,
                    ProgressKind::Completed {
                        result: task.context.get(FINAL_RESULT_KEY).cloned().unwrap_or_default(),
                        validation: task.context.get(VALIDATION_RESULT_KEY).cloned().unwrap_or_default(),
                    },
                );
            }
            Ok(Progress::Interrupted(interruption)) => {
                info!(task_id = %task.id, reason = %interruption.reason, step = task.current_step_index + 1, "task interrupted");
                task.interrupt(interruption.clone())?;
                self.store.save(task).await?;
                self.events.publish(
                    task.id,
                    ProgressKind::Interrupted {
                        reason: interruption.reason,
                        data: interruption.data,
                    },
                );
            }
            Ok(Progress::Failed(reason)) => self.fail_task(task, &reason).await?,
            Err(err) => self.fail_task(task, &err.to_string()).await?,
        }
        Ok(task.status)
    }

    async fn fail_task(&self, task: &mut Task, reason: &str) -> DomainResult<()> {
        mark_failed(task, reason)?;
        self.store.save(task).await?;
        self.events.publish(
            task.id,
            ProgressKind::Failed {
                error: reason.to_string(),
            },
        );
        Ok(())
    }

    async fn transition(&self, task: &mut Task, status: TaskStatus) -> DomainResult<()> {
        task.transition_to(status)?;
        self.store.save(task).await?;
        self.events.publish(task.id, ProgressKind::StatusChange { status });
        Ok(())
    }

    async fn load(&self, task_id: Uuid) -> DomainResult<Task> {
        self.store
            .load(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))
    }
}

#[async_trait]
impl TaskRunner for Orchestrator {
    async fn run(&self, run: TaskRun) -> DomainResult<TaskStatus> {
        self.run_to_settlement(run).await
    }
}

/// Mark the step the task was interrupted on as done and move past it.
fn complete_current_step(task: &mut Task, result: Value) {
    let index = task.current_step_index;
    if let Some(step) = task.plan.get_mut(index) {
        step.mark_completed(result);
        let attempts = step.retry_count + 1;
        task.history.push(HistoryEntry::new(index, &task.plan[index], "success", attempts));
        task.current_step_index = task.first_incomplete_index();
    }
}

fn mark_failed(task: &mut Task, reason: &str) -> DomainResult<()> {
    error!(task_id = %task.id, reason, "task failed");
    task.transition_or_force(TaskStatus::Failed)?;
    task.clear_interrupt();
    task.context.insert(FAILURE_REASON_KEY.to_string(), json!(reason));
    Ok(())
}

fn not_interrupted(status: TaskStatus) -> ResumeResponse {
    ResumeResponse::rejected(format!("Task not interrupted (status: {status})"))
}

fn merge_response(context: &mut Context, response: &Value) {
    if let Value::Object(map) = response {
        context.extend(map.clone());
    }
}
