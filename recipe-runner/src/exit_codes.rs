//! Stable exit codes for `recipe-runner` commands.

/// Command succeeded; for `run`, every step passed.
pub const OK: i32 = 0;
/// A step failed: non-zero exit, timeout, failed condition or missing required document.
pub const FAILED: i32 = 1;
/// The recipe, an agent, a variable or the runner config is invalid. Nothing ran.
pub const INVALID: i32 = 2;
