//! Loop exit decisions for live runs.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::debug;

use crate::core::condition::{CommandCheck, loop_should_exit};
use crate::core::recipe::LoopCondition;
use crate::engine::LoopFlow;

/// Remembers loop-member output and decides, after each full iteration,
/// whether the loop stops early.
#[derive(Debug, Default)]
pub struct LoopController {
    outputs: BTreeMap<String, String>,
    last_step: Option<String>,
}

impl LoopController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the captured output of a loop member.
    pub fn record(&mut self, step_id: &str, output: &str) {
        self.outputs.insert(step_id.to_string(), output.to_string());
        self.last_step = Some(step_id.to_string());
    }

    /// Evaluate the exit condition against the named step's output, or the most
    /// recent output of the iteration when no step is named.
    pub fn finish_iteration<C: CommandCheck + ?Sized>(
        &mut self,
        iteration: u32,
        condition: Option<&LoopCondition>,
        checks: &C,
    ) -> Result<LoopFlow> {
        let Some(condition) = condition else {
            return Ok(LoopFlow::Repeat);
        };
        let step = condition.step.as_ref().or(self.last_step.as_ref());
        let output = step
            .and_then(|id| self.outputs.get(id))
            .map(String::as_str)
            .unwrap_or_default();
        let exit = loop_should_exit(condition, output, checks)?;
        debug!(iteration, step = ?step, exit, "loop condition evaluated");
        if exit {
            return Ok(LoopFlow::Exit);
        }
        Ok(LoopFlow::Repeat)
    }
}
