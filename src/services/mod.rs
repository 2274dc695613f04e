pub mod circuit_breaker;
pub mod dag_executor;
pub mod event_bus;
pub mod orchestrator;
pub mod param_resolver;
pub mod retry_engine;
pub mod task_worker;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerService, CircuitState, CircuitStats};
pub use dag_executor::{BatchFailure, DagExecutor, ExecutorConfig, StepFailureKind, WaveOutcome};
pub use event_bus::{EventBus, ProgressEvent, ProgressKind, TaskSubscription};
pub use orchestrator::{Collaborators, Orchestrator, ResumeResponse};
pub use retry_engine::{classify_failure, RetryEngine, RetryOutcome, RetryPolicy, RetryStrategy};
pub use task_worker::{TaskQueue, TaskRun, TaskRunKind, TaskRunner, TaskWorkerPool};
