//! Top-level driver for a live recipe run.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::agent::AgentResolver;
use crate::core::condition::CommandCheck;
use crate::core::recipe::Recipe;
use crate::core::template::resolve_variables;
use crate::engine::Engine;
use crate::error::{DefinitionError, RunFailure};
use crate::io::config::RunnerConfig;
use crate::io::context::RunContext;
use crate::io::invoker::ToolInvoker;
use crate::io::run_log::{RunLog, RunLogPaths, run_stamp};
use crate::step::{StepExecutor, StepResult};

/// Caller input for one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Target tool; the configured default when `None`.
    pub tool: Option<String>,
    /// Explicit variable values. Missing ones fall back to the environment, then defaults.
    pub variables: BTreeMap<String, String>,
    /// Echo the run log and agent output to the console.
    pub echo: bool,
}

/// Outcome of a run, also written as the JSON run summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub recipe_id: String,
    pub tool: String,
    pub success: bool,
    pub steps: Vec<StepResult>,
    /// Completed loop iterations, when the recipe has a loop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub log_path: PathBuf,
    pub summary_path: PathBuf,
}

/// Runs recipes against real or scripted collaborators.
pub struct Orchestrator<'a, A: ?Sized, I: ?Sized, C: ?Sized> {
    ctx: &'a RunContext,
    config: &'a RunnerConfig,
    agents: &'a A,
    invoker: &'a I,
    checks: &'a C,
}

impl<'a, A, I, C> Orchestrator<'a, A, I, C>
where
    A: AgentResolver + ?Sized,
    I: ToolInvoker + ?Sized,
    C: CommandCheck + ?Sized,
{
    pub fn new(
        ctx: &'a RunContext,
        config: &'a RunnerConfig,
        agents: &'a A,
        invoker: &'a I,
        checks: &'a C,
    ) -> Self {
        Self {
            ctx,
            config,
            agents,
            invoker,
            checks,
        }
    }

    /// Run `recipe` to completion or to its first failure.
    ///
    /// Definition problems (unknown agent, unsupported tool, missing variable)
    /// are returned as a [`DefinitionError`] before anything runs. Step
    /// failures are reported in [`RunResult::failure`].
    #[instrument(skip_all, fields(recipe = %recipe.id))]
    pub fn run(&self, recipe: &Recipe, request: &RunRequest) -> Result<RunResult> {
        let tool = request
            .tool
            .clone()
            .unwrap_or_else(|| self.config.default_tool.clone());

        let variables = resolve_variables(&recipe.variables, &request.variables, |name| {
            std::env::var(name).ok()
        });
        let profiles = self.config.tool_profiles();
        let prepared = Engine::prepare(
            recipe,
            &tool,
            &profiles,
            self.agents,
            self.config.loop_iteration_cap,
        );
        let (engine, variables) = match (prepared, variables) {
            (Ok(engine), Ok(variables)) => (engine, variables),
            (prepared, variables) => {
                let mut problems = Vec::new();
                if let Err(err) = prepared {
                    match err.downcast::<DefinitionError>() {
                        Ok(definition) => problems.extend(definition.problems),
                        Err(other) => return Err(other),
                    }
                }
                if let Err(missing) = variables {
                    problems.extend(missing.iter().map(|name| missing_variable(recipe, name)));
                }
                return Err(DefinitionError::new(&recipe.id, problems).into());
            }
        };

        let stamp = run_stamp(Local::now());
        let run_log = RunLog::create(
            RunLogPaths::new(&self.ctx.logs_root, &recipe.id, &stamp),
            request.echo,
        )?;
        info!(tool = %tool, log = %run_log.paths().log_path.display(), "run started");
        run_log.note(&format!(
            "recipe '{}' v{} with {} ({}), {} plan entries",
            recipe.id,
            recipe.version,
            tool,
            engine.profile().family.as_str(),
            engine.plan().entries.len()
        ))?;

        let mut executor = StepExecutor::new(
            recipe,
            &variables,
            self.ctx,
            self.config,
            self.invoker,
            self.checks,
            &run_log,
        );
        let outcome = engine.drive(&mut executor)?;
        let (steps, failure) = executor.finish();

        let success = failure.is_none() && !outcome.halted;
        let result = RunResult {
            recipe_id: recipe.id.clone(),
            tool,
            success,
            steps,
            loop_iterations: engine.plan().has_loop().then_some(outcome.loop_iterations),
            failure,
            log_path: run_log.paths().log_path.clone(),
            summary_path: run_log.paths().summary_path.clone(),
        };

        if success {
            run_log.note(&format!(
                "recipe '{}' completed: {} steps",
                recipe.id,
                result.steps.len()
            ))?;
            info!(steps = result.steps.len(), "run succeeded");
        } else {
            warn!(steps = result.steps.len(), "run failed");
        }
        run_log.write_summary(&result)?;
        Ok(result)
    }
}

fn missing_variable(recipe: &Recipe, name: &str) -> String {
    let described = recipe
        .variables
        .get(name)
        .and_then(|spec| spec.description())
        .map(|text| format!(" ({text})"))
        .unwrap_or_default();
    format!("missing value for variable '{name}'{described} (pass --var {name}=... or set ${name})")
}
