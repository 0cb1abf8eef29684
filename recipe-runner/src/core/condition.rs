//! Condition evaluation for step checks and loop exit conditions.
//!
//! `contains` and `regex` are pure. `command` checks are delegated to a
//! [`CommandCheck`] so the evaluator stays free of process I/O.

use anyhow::{Context, Result};
use regex::Regex;

use crate::core::recipe::{Check, ConditionKind, LoopCondition, StepCondition};

/// Runs an auxiliary shell command against captured step output.
pub trait CommandCheck {
    /// Return `true` when `cmd` exits successfully with `output` on stdin.
    fn run_check(&self, cmd: &str, output: &str) -> Result<bool>;
}

/// Outcome of applying a step condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail { reason: String },
    /// Evaluated under `type: always`; never enforced.
    Recorded { passed: bool },
}

/// Evaluate a single check against `output`.
pub fn evaluate_check<C: CommandCheck + ?Sized>(
    check: &Check,
    output: &str,
    commands: &C,
) -> Result<bool> {
    match check {
        Check::Contains { value } => Ok(output.contains(value.as_str())),
        Check::Regex { pattern } => {
            let re = Regex::new(pattern).with_context(|| format!("compile regex /{pattern}/"))?;
            Ok(re.is_match(output))
        }
        Check::Command { cmd } => commands
            .run_check(cmd, output)
            .with_context(|| format!("run check command `{cmd}`")),
    }
}

/// Apply a step condition to the step's captured output.
pub fn evaluate_step_condition<C: CommandCheck + ?Sized>(
    condition: &StepCondition,
    output: &str,
    commands: &C,
) -> Result<Verdict> {
    let passed = evaluate_check(&condition.check, output, commands)?;
    let verdict = match (condition.kind, passed) {
        (ConditionKind::Always, passed) => Verdict::Recorded { passed },
        (ConditionKind::OnSuccess, true) | (ConditionKind::OnFailure, false) => Verdict::Pass,
        (ConditionKind::OnSuccess, false) => Verdict::Fail {
            reason: format!("expected output to satisfy {}", condition.check.describe()),
        },
        (ConditionKind::OnFailure, true) => Verdict::Fail {
            reason: format!(
                "expected output not to satisfy {}",
                condition.check.describe()
            ),
        },
    };
    Ok(verdict)
}

/// True when the loop should stop after the current iteration.
pub fn loop_should_exit<C: CommandCheck + ?Sized>(
    condition: &LoopCondition,
    output: &str,
    commands: &C,
) -> Result<bool> {
    evaluate_check(&condition.check, output, commands)
}

/// Shorten captured output for diagnostics.
pub fn excerpt(output: &str, max_chars: usize) -> String {
    let trimmed = output.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(max_chars).collect();
    format!("{head}…")
}
