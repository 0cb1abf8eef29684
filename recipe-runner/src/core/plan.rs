//! Execution plan expansion.
//!
//! The plan is a flat, ordered list of `(step, iteration)` entries computed once
//! before anything runs. Both backends walk the same list, so loop membership is
//! never re-derived during a run.

use std::collections::HashSet;

use anyhow::{Result, anyhow};
use serde::Serialize;

use crate::core::recipe::Recipe;

/// Iterations used when `loop.maxIterations` is absent.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// One scheduled step execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    /// 1-based position in the plan; stable across backends.
    pub seq: usize,
    /// Index into `Recipe::steps`.
    pub step_index: usize,
    pub step_id: String,
    /// 1-based loop iteration, or `None` for steps outside the loop.
    pub iteration: Option<u32>,
    /// True for the last entry of a loop iteration.
    pub ends_iteration: bool,
}

impl PlanEntry {
    /// File-name friendly label, e.g. `03-review-iter2`.
    pub fn label(&self) -> String {
        match self.iteration {
            Some(iter) => format!("{:02}-{}-iter{}", self.seq, self.step_id, iter),
            None => format!("{:02}-{}", self.seq, self.step_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub entries: Vec<PlanEntry>,
    /// Number of loop iterations scheduled (0 when the recipe has no loop).
    pub loop_iterations: u32,
}

impl ExecutionPlan {
    pub fn has_loop(&self) -> bool {
        self.loop_iterations > 0
    }
}

/// Expand `recipe` into its flat plan.
///
/// Non-loop steps appear once, in file order. The loop body is inserted where
/// the first loop member appears and repeats `loop.steps` (in loop order) for
/// `min(maxIterations, iteration_cap)` iterations. Loop members never run outside
/// the loop body.
pub fn expand_plan(recipe: &Recipe, iteration_cap: u32) -> Result<ExecutionPlan> {
    let mut entries = Vec::new();
    let mut push = |step_index: usize, iteration: Option<u32>, ends_iteration: bool| {
        entries.push(PlanEntry {
            seq: entries.len() + 1,
            step_index,
            step_id: recipe.steps[step_index].id.clone(),
            iteration,
            ends_iteration,
        });
    };

    let Some(spec) = &recipe.loop_spec else {
        for index in 0..recipe.steps.len() {
            push(index, None, false);
        }
        return Ok(ExecutionPlan {
            entries,
            loop_iterations: 0,
        });
    };

    let body = spec
        .steps
        .iter()
        .map(|id| {
            recipe
                .steps
                .iter()
                .position(|s| &s.id == id)
                .ok_or_else(|| anyhow!("loop references unknown step '{id}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    if body.is_empty() {
        return Err(anyhow!("loop.steps must name at least one step"));
    }
    let members: HashSet<usize> = body.iter().copied().collect();
    let iterations = spec
        .max_iterations
        .unwrap_or(DEFAULT_MAX_ITERATIONS)
        .min(iteration_cap)
        .max(1);

    let mut loop_emitted = false;
    for index in 0..recipe.steps.len() {
        if !members.contains(&index) {
            push(index, None, false);
            continue;
        }
        if loop_emitted {
            continue;
        }
        loop_emitted = true;
        for iter in 1..=iterations {
            for (pos, &body_index) in body.iter().enumerate() {
                push(body_index, Some(iter), pos + 1 == body.len());
            }
        }
    }

    Ok(ExecutionPlan {
        entries,
        loop_iterations: iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recipe::LoopSpec;
    use crate::test_support::recipe_with_steps;

    fn ids(plan: &ExecutionPlan) -> Vec<String> {
        plan.entries
            .iter()
            .map(|e| match e.iteration {
                Some(i) => format!("{}#{}", e.step_id, i),
                None => e.step_id.clone(),
            })
            .collect()
    }

    #[test]
    fn plan_without_loop_is_file_order() {
        let recipe = recipe_with_steps(&["a", "b", "c"]);
        let plan = expand_plan(&recipe, 10).expect("plan");
        assert_eq!(ids(&plan), vec!["a", "b", "c"]);
        assert!(!plan.has_loop());
        assert_eq!(plan.entries[2].seq, 3);
    }

    #[test]
    fn loop_body_replaces_first_member_in_loop_order() {
        let mut recipe = recipe_with_steps(&["plan", "fix", "review", "ship"]);
        recipe.loop_spec = Some(LoopSpec {
            steps: vec!["review".to_string(), "fix".to_string()],
            max_iterations: Some(2),
            condition: None,
        });
        let plan = expand_plan(&recipe, 10).expect("plan");
        assert_eq!(
            ids(&plan),
            vec!["plan", "review#1", "fix#1", "review#2", "fix#2", "ship"]
        );
        let ends: Vec<bool> = plan.entries.iter().map(|e| e.ends_iteration).collect();
        assert_eq!(ends, vec![false, false, true, false, true, false]);
    }

    #[test]
    fn missing_max_iterations_defaults_to_three_and_cap_applies() {
        let mut recipe = recipe_with_steps(&["a"]);
        recipe.loop_spec = Some(LoopSpec {
            steps: vec!["a".to_string()],
            max_iterations: None,
            condition: None,
        });
        assert_eq!(expand_plan(&recipe, 10).expect("plan").loop_iterations, 3);

        recipe.loop_spec.as_mut().expect("loop").max_iterations = Some(50);
        let capped = expand_plan(&recipe, 4).expect("plan");
        assert_eq!(capped.loop_iterations, 4);
        assert_eq!(capped.entries.len(), 4);
    }

    #[test]
    fn unknown_loop_step_is_an_error() {
        let mut recipe = recipe_with_steps(&["a"]);
        recipe.loop_spec = Some(LoopSpec {
            steps: vec!["ghost".to_string()],
            max_iterations: None,
            condition: None,
        });
        let err = expand_plan(&recipe, 10).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn labels_include_iteration() {
        let entry = PlanEntry {
            seq: 3,
            step_index: 0,
            step_id: "review".to_string(),
            iteration: Some(2),
            ends_iteration: false,
        };
        assert_eq!(entry.label(), "03-review-iter2");
    }
}
