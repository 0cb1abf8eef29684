//! Recipe workflow orchestration for command-line coding agents.
//!
//! A recipe is a YAML description of ordered agent steps, an optional
//! review/fix loop and the documents steps hand to each other. The crate runs
//! a recipe against one agent CLI, or turns it into a standalone bash script
//! that does the same thing. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (recipe model, plan expansion,
//!   conversation handles, command building, conditions). No I/O.
//! - **[`io`]**: Side-effecting operations (config, recipe and agent loading,
//!   documents, process execution, run logs). Isolated behind traits so tests
//!   can script them.
//!
//! [`engine`] walks the expanded plan once and feeds each resolved step to a
//! sink: [`step::StepExecutor`] for live runs (driven by [`orchestrator`]) and
//! [`script::ScriptEmitter`] for generated scripts.

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod orchestrator;
pub mod script;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
