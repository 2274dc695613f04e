//! Infrastructure layer
//!
//! Cross-cutting concerns that the CLI wires together:
//! - Configuration loading (figment)
//! - Structured logging (tracing)

pub mod config;
pub mod logging;
