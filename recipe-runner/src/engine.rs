//! Plan expansion and command resolution shared by both backends.
//!
//! [`Engine::prepare`] checks everything that can be checked before a step
//! runs. [`Engine::drive`] then walks the plan once, resolving the agent,
//! conversation handle and invocation for every entry, and hands each resolved
//! step to a [`StepSink`]. The live executor and the script emitter are sinks,
//! so both see the same order, the same loop expansion and the same commands.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use tracing::{debug, info};

use crate::core::agent::{Agent, AgentResolver};
use crate::core::command::{InvocationRequest, ToolInvocation, ToolProfile, build_invocation};
use crate::core::conversation::{ConversationHandle, ConversationManager};
use crate::core::plan::{ExecutionPlan, PlanEntry, expand_plan};
use crate::core::recipe::{LoopCondition, Recipe, Step, validate_recipe};
use crate::error::DefinitionError;

/// Everything a sink needs to act on one plan entry.
#[derive(Debug)]
pub struct ResolvedStep<'a> {
    pub entry: &'a PlanEntry,
    pub step: &'a Step,
    pub agent: &'a Agent,
    pub handle: ConversationHandle,
    pub invocation: ToolInvocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    Continue,
    /// Stop the run; no further entries are delivered.
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopFlow {
    Repeat,
    /// Skip the remaining loop entries.
    Exit,
}

/// Receives resolved steps in plan order.
pub trait StepSink {
    fn step(&mut self, resolved: &ResolvedStep<'_>) -> Result<StepFlow>;

    /// Called after the last entry of loop iteration `iteration`.
    fn iteration_end(
        &mut self,
        iteration: u32,
        condition: Option<&LoopCondition>,
    ) -> Result<LoopFlow>;
}

/// How [`Engine::drive`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveOutcome {
    pub halted: bool,
    /// Loop iterations that ran to completion.
    pub loop_iterations: u32,
}

/// A recipe bound to a tool, with agents resolved and the plan expanded.
#[derive(Debug)]
pub struct Engine<'r> {
    recipe: &'r Recipe,
    tool: String,
    profile: ToolProfile,
    plan: ExecutionPlan,
    agents: BTreeMap<String, Agent>,
}

impl<'r> Engine<'r> {
    /// Validate the recipe for `tool` and resolve every agent up front.
    ///
    /// All problems are collected into one [`DefinitionError`].
    pub fn prepare<A: AgentResolver + ?Sized>(
        recipe: &'r Recipe,
        tool: &str,
        profiles: &BTreeMap<String, ToolProfile>,
        resolver: &A,
        iteration_cap: u32,
    ) -> Result<Self> {
        let mut problems = validate_recipe(recipe);

        if !recipe.supports_tool(tool) {
            problems.push(format!(
                "tool '{tool}' is not supported (recipe supports: {})",
                recipe.tools.join(", ")
            ));
        }
        let profile = profiles.get(tool).cloned();
        if profile.is_none() {
            let known: Vec<&str> = profiles.keys().map(String::as_str).collect();
            problems.push(format!(
                "unknown tool '{tool}' (configured: {})",
                known.join(", ")
            ));
        }

        let mut agents = BTreeMap::new();
        for step in &recipe.steps {
            if agents.contains_key(&step.agent) {
                continue;
            }
            match resolver.resolve(&step.agent) {
                Ok(mut agent) => {
                    agent.id.clone_from(&step.agent);
                    agents.insert(step.agent.clone(), agent);
                }
                Err(err) => problems.push(format!("step '{}': {err:#}", step.id)),
            }
        }

        let plan = if problems.is_empty() {
            match expand_plan(recipe, iteration_cap) {
                Ok(plan) => Some(plan),
                Err(err) => {
                    problems.push(err.to_string());
                    None
                }
            }
        } else {
            None
        };

        match (plan, profile) {
            (Some(plan), Some(profile)) if problems.is_empty() => {
                debug!(
                    recipe = %recipe.id,
                    tool,
                    entries = plan.entries.len(),
                    loop_iterations = plan.loop_iterations,
                    "engine prepared"
                );
                Ok(Self {
                    recipe,
                    tool: tool.to_string(),
                    profile,
                    plan,
                    agents,
                })
            }
            _ => Err(DefinitionError::new(&recipe.id, problems).into()),
        }
    }

    pub fn recipe(&self) -> &Recipe {
        self.recipe
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn profile(&self) -> &ToolProfile {
        &self.profile
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Walk the plan, feeding each resolved step to `sink`.
    pub fn drive<S: StepSink + ?Sized>(&self, sink: &mut S) -> Result<DriveOutcome> {
        let mut conversations = ConversationManager::new(self.recipe.conversation_strategy);
        let loop_condition = self
            .recipe
            .loop_spec
            .as_ref()
            .and_then(|spec| spec.condition.as_ref());
        let options = self
            .recipe
            .options_for(&self.tool, self.profile.family.as_str());

        let mut loop_exited = false;
        let mut loop_iterations = 0;
        for entry in &self.plan.entries {
            if loop_exited && entry.iteration.is_some() {
                continue;
            }
            let step = &self.recipe.steps[entry.step_index];
            let agent = self
                .agents
                .get(&step.agent)
                .ok_or_else(|| anyhow!("agent '{}' was not resolved", step.agent))?;
            let handle = conversations.next_handle(&self.tool, step.continue_conversation);
            let invocation = build_invocation(
                &self.profile,
                &InvocationRequest {
                    tool: &self.tool,
                    agent,
                    handle: &handle,
                    options,
                },
            );
            debug!(
                entry = %entry.label(),
                session = handle.session,
                continuing = handle.continuing,
                command = %invocation.display(),
                "step resolved"
            );

            let resolved = ResolvedStep {
                entry,
                step,
                agent,
                handle,
                invocation,
            };
            if sink.step(&resolved)? == StepFlow::Halt {
                info!(step = %entry.step_id, "run halted");
                return Ok(DriveOutcome {
                    halted: true,
                    loop_iterations,
                });
            }

            if entry.ends_iteration
                && let Some(iteration) = entry.iteration
            {
                loop_iterations = iteration;
                if sink.iteration_end(iteration, loop_condition)? == LoopFlow::Exit {
                    info!(iteration, "loop exit condition met");
                    loop_exited = true;
                }
            }
        }

        Ok(DriveOutcome {
            halted: false,
            loop_iterations,
        })
    }
}
