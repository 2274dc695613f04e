//! Domain models for the Steward orchestration engine.

pub mod config;
pub mod interruption;
pub mod outcome;
pub mod params;
pub mod step;
pub mod summary;
pub mod task;

pub use config::{
    CircuitBreakerSettings, Config, DatabaseConfig, LoggingConfig, OrchestratorSettings,
    RetryConfig,
};
pub use interruption::{InterruptReason, Interruption};
pub use outcome::{is_truthy, OutcomeDefinition, ValidationReport};
pub use params::ParamValue;
pub use step::{Step, StepStatus};
pub use summary::{build_result_summary, TaskResultView};
pub use task::{Context, HistoryEntry, Task, TaskStatus};
