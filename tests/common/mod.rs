//! Common test utilities for integration tests
//!
//! Scripted tools and collaborator doubles plus a harness that wires an
//! orchestrator with fast retry settings.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use steward::adapters::{builtin_tools, InMemoryTaskRepository};
use steward::domain::models::{
    Context, HistoryEntry, OrchestratorSettings, OutcomeDefinition, Step, Task, TaskStatus,
    ValidationReport,
};
use steward::domain::ports::{
    Interpreter, Planner, TaskRepository, ToolError, ToolExecutor, ToolOutput, ToolRegistry, Validator,
};
use steward::domain::DomainResult;
use steward::services::{
    CircuitBreakerConfig, CircuitBreakerService, Collaborators, DagExecutor, EventBus, ExecutorConfig,
    Orchestrator, RetryEngine, RetryPolicy,
};

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// ============================================================================
// Tools
// ============================================================================

/// Replays a script of results, repeating the last one once the script runs out.
pub struct ScriptedTool {
    script: Mutex<VecDeque<Result<ToolOutput, ToolError>>>,
    last: Mutex<Option<Result<ToolOutput, ToolError>>>,
    calls: AtomicU32,
}

impl ScriptedTool {
    pub fn new(script: Vec<Result<ToolOutput, ToolError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::new(vec![Err(ToolError::Failed(message.to_string()))])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for ScriptedTool {
    async fn execute(&self, _params: &Map<String, Value>) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(result) = next {
            *last = Some(result);
        }
        last.clone()
            .unwrap_or_else(|| Err(ToolError::Failed("script is empty".to_string())))
    }
}

/// Records the order in which steps ran through their `label` parameter.
#[derive(Default)]
pub struct RecordingTool {
    pub order: Mutex<Vec<String>>,
}

#[async_trait]
impl ToolExecutor for RecordingTool {
    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let label = params.get("label").and_then(Value::as_str).unwrap_or_default().to_string();
        self.order.lock().unwrap().push(label.clone());
        Ok(ToolOutput::ok(json!(label)).with_update(format!("ran_{label}"), json!(true)))
    }
}

/// Built-in tools plus extras.
pub fn tools_with(extra: Vec<(&str, Arc<dyn ToolExecutor>)>) -> ToolRegistry {
    let mut tools = builtin_tools(Duration::from_secs(5)).unwrap();
    for (action_type, tool) in extra {
        tools.register(action_type, tool);
    }
    tools
}

// ============================================================================
// Collaborators
// ============================================================================

/// Fixed outcome; optionally asks a question until a clarification answer arrives.
pub struct StaticInterpreter {
    pub domain: String,
    pub question: Option<String>,
}

impl StaticInterpreter {
    pub fn new(domain: &str) -> Arc<Self> {
        Arc::new(Self { domain: domain.to_string(), question: None })
    }

    pub fn asking(domain: &str, question: &str) -> Arc<Self> {
        Arc::new(Self {
            domain: domain.to_string(),
            question: Some(question.to_string()),
        })
    }
}

#[async_trait]
impl Interpreter for StaticInterpreter {
    async fn interpret(&self, goal: &str, context: &Context) -> DomainResult<OutcomeDefinition> {
        match &self.question {
            Some(question) if !context.contains_key("clarification_answer") => {
                Ok(OutcomeDefinition::needing_clarification(goal, question))
            }
            _ => Ok(OutcomeDefinition::new(goal, &self.domain).with_criterion("All steps done")),
        }
    }
}

/// Returns `initial` first and a copy of `extra` (ids suffixed by round) afterwards.
pub struct FixedPlanner {
    pub initial: Vec<Step>,
    pub extra: Vec<Step>,
}

impl FixedPlanner {
    pub fn new(initial: Vec<Step>) -> Arc<Self> {
        Arc::new(Self { initial, extra: Vec::new() })
    }

    pub fn with_extra(initial: Vec<Step>, extra: Vec<Step>) -> Arc<Self> {
        Arc::new(Self { initial, extra })
    }
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn create_plan(&self, _outcome: &OutcomeDefinition, context: &Context) -> DomainResult<Vec<Step>> {
        let round = context.get("_replan_count").and_then(Value::as_u64).unwrap_or(0);
        if round == 0 {
            return Ok(self.initial.clone());
        }
        Ok(self
            .extra
            .iter()
            .map(|step| {
                let mut step = step.clone().with_id(format!("{}-r{round}", step.id));
                step.dependencies.clear();
                step
            })
            .collect())
    }
}

/// Replays validation reports, repeating the last one.
pub struct ScriptedValidator {
    reports: Mutex<VecDeque<ValidationReport>>,
    last: Mutex<ValidationReport>,
    calls: AtomicU32,
}

impl ScriptedValidator {
    pub fn new(reports: Vec<ValidationReport>) -> Arc<Self> {
        Arc::new(Self {
            reports: Mutex::new(reports.into()),
            last: Mutex::new(ValidationReport::complete(1.0)),
            calls: AtomicU32::new(0),
        })
    }

    pub fn approving() -> Arc<Self> {
        Self::new(vec![ValidationReport::complete(0.95)])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(
        &self,
        _outcome: &OutcomeDefinition,
        _context: &Context,
        _history: &[HistoryEntry],
    ) -> DomainResult<ValidationReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.reports.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(report) = next {
            *last = report;
        }
        Ok(last.clone())
    }
}

// ============================================================================
// Plans
// ============================================================================

/// Ten dependent steps; step 6 asks for payment approval of 680 USD.
pub fn tokyo_plan() -> Vec<Step> {
    let step = |id: &str, action: &str, description: &str| {
        Step::new(action, description).with_id(id).with_max_retries(3)
    };
    vec![
        step("capture", "set_context", "Record trip details")
            .with_param("destination", "Tokyo")
            .with_output("destination"),
        step("search", "set_context", "Search flights")
            .with_dependency("capture")
            .with_param("flight_options", json!(["NH107", "JL001"]))
            .with_output("flight_options"),
        step("budget", "set_context", "Check budget")
            .with_dependency("search")
            .with_param("within_budget", true)
            .with_output("within_budget"),
        step("select", "set_context", "Select flight")
            .with_dependency("budget")
            .with_param("selected_flight", "NH107")
            .with_param("fare", 680)
            .with_output("selected_flight")
            .with_output("fare"),
        step("hold", "set_context", "Hold seat")
            .with_dependency("select")
            .with_param("seat_hold", "{{selected_flight}}-14C")
            .with_output("seat_hold"),
        step("pay", "request_payment_approval", "Approve payment")
            .with_dependency("hold")
            .with_param("amount", "{{fare}}")
            .with_param("currency", "USD"),
        step("charge", "set_context", "Charge card")
            .with_dependency("pay")
            .with_param("charged_to", "{{user_payment_method}}")
            .with_output("charged_to"),
        step("book", "set_context", "Book flight")
            .with_dependency("charge")
            .with_param("booking_confirmation", "NH-{{seat_hold}}")
            .with_output("booking_confirmation"),
        step("itinerary", "set_context", "Build itinerary")
            .with_dependency("book")
            .with_param("itinerary", json!({"confirmation": "{{booking_confirmation}}"}))
            .with_output("itinerary"),
        step("send", "set_context", "Send itinerary")
            .with_dependency("itinerary")
            .with_param("itinerary_sent", true)
            .with_output("itinerary_sent"),
    ]
}

// ============================================================================
// Harness
// ============================================================================

pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        immediate_delay: Duration::ZERO,
        jitter: 0.0,
        step_timeout: Duration::from_secs(5),
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub breaker: Arc<CircuitBreakerService>,
    pub worker: JoinHandle<()>,
}

impl Harness {
    pub fn new(collaborators: Collaborators, tools: ToolRegistry) -> Self {
        Self::with_store(Arc::new(InMemoryTaskRepository::new()), collaborators, tools)
    }

    pub fn with_store(store: Arc<dyn TaskRepository>, collaborators: Collaborators, tools: ToolRegistry) -> Self {
        let breaker = Arc::new(CircuitBreakerService::new(CircuitBreakerConfig::default()));
        let retry = RetryEngine::new(fast_retry_policy(), Arc::clone(&breaker));
        let events = Arc::new(EventBus::default());
        let settings = OrchestratorSettings::default();
        let executor = DagExecutor::new(retry, Arc::new(tools), ExecutorConfig::from(&settings))
            .with_events(Arc::clone(&events));
        let (orchestrator, worker) =
            Orchestrator::start(store, collaborators, Arc::new(executor), events, settings);
        Self { orchestrator, breaker, worker }
    }

    /// Poll until the task completes, fails or is interrupted.
    pub async fn wait_settled(&self, task_id: Uuid) -> Task {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let task = self
                .orchestrator
                .get_status(task_id)
                .await
                .unwrap()
                .expect("task should exist");
            if task.status.is_terminal() || task.status == TaskStatus::Interrupted {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {task_id} did not settle, last status {}",
                task.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn collaborators(
    interpreter: Arc<dyn Interpreter>,
    planner: Arc<dyn Planner>,
    validator: Arc<dyn Validator>,
) -> Collaborators {
    Collaborators { interpreter, planner, validator }
}
