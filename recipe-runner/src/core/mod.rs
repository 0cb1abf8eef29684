//! Deterministic, pure logic shared by the runner core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod agent;
pub mod command;
pub mod condition;
pub mod conversation;
pub mod plan;
pub mod recipe;
pub mod template;
