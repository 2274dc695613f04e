//! Adapters: persistence, playbook collaborators and built-in tools.

pub mod memory;
pub mod playbook;
pub mod sqlite;
pub mod tools;

pub use memory::InMemoryTaskRepository;
pub use playbook::Playbook;
pub use sqlite::SqliteTaskRepository;
pub use tools::builtin_tools;
