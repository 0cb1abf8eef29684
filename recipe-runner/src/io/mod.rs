//! I/O helpers for runner commands.

pub mod agents;
pub mod check_command;
pub mod config;
pub mod context;
pub mod documents;
pub mod invoker;
pub mod process;
pub mod prompt;
pub mod recipe_store;
pub mod run_log;
