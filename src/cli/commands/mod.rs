//! CLI command implementations.

pub mod init;
pub mod resume;
pub mod run;
pub mod task;
