//! Ports (interfaces) through which the engine reaches its collaborators.

pub mod collaborators;
pub mod task_repository;
pub mod tool;

pub use collaborators::{replace_with_user_help, Interpreter, Planner, Validator, REQUEST_USER_HELP};
pub use task_repository::TaskRepository;
pub use tool::{ToolError, ToolExecutor, ToolOutput, ToolRegistry};
