//! Error kinds callers branch on.
//!
//! Everything else flows through `anyhow` with context attached at the I/O
//! boundary.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// A recipe, agent reference, tool choice or variable set that cannot run.
///
/// Detected before any step executes. Carries every problem found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("recipe '{recipe}' is invalid:\n- {}", .problems.join("\n- "))]
pub struct DefinitionError {
    pub recipe: String,
    pub problems: Vec<String>,
}

impl DefinitionError {
    pub fn new(recipe: impl Into<String>, problems: Vec<String>) -> Self {
        Self {
            recipe: recipe.into(),
            problems,
        }
    }

    pub fn single(recipe: impl Into<String>, problem: impl Into<String>) -> Self {
        Self::new(recipe, vec![problem.into()])
    }
}

/// `.recipe-runner/config.toml` exists but cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration {}: {message}", .path.display())]
pub struct ConfigError {
    pub path: PathBuf,
    pub message: String,
}

/// Why a run halted. Recorded in the run result and summary.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RunFailure {
    /// Non-zero exit, timeout, missing binary or spawn failure.
    #[error("recipe '{recipe}' step '{step}': {message}")]
    Execution {
        recipe: String,
        step: String,
        message: String,
    },
    #[error("recipe '{recipe}' step '{step}': condition failed: {reason}\n--- output excerpt ---\n{excerpt}")]
    Condition {
        recipe: String,
        step: String,
        reason: String,
        excerpt: String,
    },
    #[error("recipe '{recipe}' step '{step}': required document '{document}' is missing")]
    MissingDocument {
        recipe: String,
        step: String,
        document: String,
    },
}

impl RunFailure {
    pub fn step(&self) -> &str {
        match self {
            RunFailure::Execution { step, .. }
            | RunFailure::Condition { step, .. }
            | RunFailure::MissingDocument { step, .. } => step,
        }
    }
}
