//! Configuration loading
//!
//! Defaults, `.steward/config.yaml`, `.steward/local.yaml` and `STEWARD_*`
//! environment variables are merged with figment and validated once.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader, PROJECT_DIR};
