//! Steward - goal-driven task orchestration
//!
//! Steward turns a natural-language goal into an outcome definition and a
//! plan of dependent steps, executes the plan in parallel waves with retries
//! and per-action circuit breakers, suspends for human input (payments,
//! approvals, clarifications) and validates the result, replanning when the
//! validator asks for more work.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and the ports the engine talks through
//! - **Service Layer** (`services`): orchestrator, DAG executor, retry engine, circuit breakers
//! - **Adapters** (`adapters`): SQLite and in-memory task stores, playbooks, built-in tools
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use steward::adapters::{builtin_tools, InMemoryTaskRepository, Playbook};
//! use steward::services::{Collaborators, DagExecutor, EventBus, Orchestrator, RetryEngine};
//!
//! let playbook = Arc::new(Playbook::load("trip.yaml".as_ref())?);
//! let collaborators = Collaborators {
//!     interpreter: playbook.clone(),
//!     planner: playbook.clone(),
//!     validator: playbook,
//! };
//! let executor = DagExecutor::new(retry, Arc::new(builtin_tools(timeout)?), Default::default());
//! let (orchestrator, _worker) = Orchestrator::start(
//!     Arc::new(InMemoryTaskRepository::new()),
//!     collaborators,
//!     Arc::new(executor),
//!     Arc::new(EventBus::default()),
//!     Default::default(),
//! );
//! let task_id = orchestrator.create_task("user-1", "Book a flight to Tokyo", Default::default()).await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    Config, Context, InterruptReason, Interruption, OutcomeDefinition, ParamValue, Step, StepStatus,
    Task, TaskStatus, ValidationReport,
};
pub use domain::ports::{Interpreter, Planner, TaskRepository, ToolExecutor, ToolRegistry, Validator};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Orchestrator, ResumeResponse};
