//! Domain layer for the Steward orchestration engine
//!
//! Models, errors and the ports through which the engine talks to its
//! collaborators (interpreter, planner, validator, tools, state store).

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, PendingStep};
