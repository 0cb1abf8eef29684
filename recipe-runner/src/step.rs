//! Live execution of resolved steps.
//!
//! [`StepExecutor`] is the [`StepSink`] that actually runs agents: it renders
//! the prompt, invokes the tool, persists the output document and applies the
//! step condition. The first failure is recorded and the run halts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::command::{CommandLine, ManualInstruction, ToolInvocation};
use crate::core::condition::{CommandCheck, Verdict, evaluate_step_condition, excerpt};
use crate::core::recipe::{ConditionKind, LoopCondition, Recipe};
use crate::core::template::interpolate;
use crate::engine::{LoopFlow, ResolvedStep, StepFlow, StepSink};
use crate::error::RunFailure;
use crate::io::config::{MissingDocumentPolicy, RunnerConfig};
use crate::io::context::RunContext;
use crate::io::documents::DocumentStore;
use crate::io::invoker::{InvokeOutput, InvokeRequest, ToolInvoker};
use crate::io::prompt::{IncludedDocument, PromptRenderer};
use crate::io::run_log::RunLog;
use crate::looping::LoopController;

const EXCERPT_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Handed to a human; nothing was executed.
    Manual,
}

/// What happened for one plan entry.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    pub tool: String,
    pub session: u32,
    pub continued: bool,
    /// Resolved command line, identical to the emitted script's.
    pub command: String,
    pub prompt: String,
    pub prompt_path: PathBuf,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub status: StepStatus,
    /// Outcome of the step's check, when it has one and it was evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_passed: Option<bool>,
    pub omitted_documents: Vec<String>,
    pub duration_ms: u64,
}

/// Live [`StepSink`].
pub struct StepExecutor<'a, I: ToolInvoker + ?Sized, C: CommandCheck + ?Sized> {
    recipe: &'a Recipe,
    variables: &'a BTreeMap<String, String>,
    ctx: &'a RunContext,
    config: &'a RunnerConfig,
    invoker: &'a I,
    checks: &'a C,
    run_log: &'a RunLog,
    documents: DocumentStore,
    prompts: PromptRenderer,
    looping: LoopController,
    manual: bool,
    results: Vec<StepResult>,
    failure: Option<RunFailure>,
}

/// Prompt and document bookkeeping shared by the exec and manual paths.
struct PreparedPrompt {
    prompt: String,
    prompt_path: PathBuf,
    omitted: Vec<String>,
}

impl<'a, I: ToolInvoker + ?Sized, C: CommandCheck + ?Sized> StepExecutor<'a, I, C> {
    pub fn new(
        recipe: &'a Recipe,
        variables: &'a BTreeMap<String, String>,
        ctx: &'a RunContext,
        config: &'a RunnerConfig,
        invoker: &'a I,
        checks: &'a C,
        run_log: &'a RunLog,
    ) -> Self {
        Self {
            recipe,
            variables,
            ctx,
            config,
            invoker,
            checks,
            run_log,
            documents: DocumentStore::new(&ctx.docs_root),
            prompts: PromptRenderer::new(),
            looping: LoopController::new(),
            manual: false,
            results: Vec::new(),
            failure: None,
        }
    }

    /// Results so far and the failure that halted the run, if any.
    pub fn finish(self) -> (Vec<StepResult>, Option<RunFailure>) {
        (self.results, self.failure)
    }

    fn fail(&mut self, failure: RunFailure) -> Result<StepFlow> {
        warn!(step = failure.step(), failure = %failure, "step failed");
        self.run_log.note(&format!("FAILED: {failure}"))?;
        self.failure = Some(failure);
        Ok(StepFlow::Halt)
    }

    fn prepare_prompt(
        &self,
        resolved: &ResolvedStep<'_>,
    ) -> Result<std::result::Result<PreparedPrompt, RunFailure>> {
        let step = resolved.step;
        let task = interpolate(step.task.trim(), self.variables)?;

        let mut included = Vec::new();
        let mut omitted = Vec::new();
        for doc in &step.include_documents {
            match self.documents.read(doc)? {
                Some(content) => included.push(IncludedDocument {
                    path: doc.clone(),
                    content,
                }),
                None if step.require_documents
                    || self.config.missing_documents == MissingDocumentPolicy::Error =>
                {
                    return Ok(Err(RunFailure::MissingDocument {
                        recipe: self.recipe.id.clone(),
                        step: step.id.clone(),
                        document: doc.clone(),
                    }));
                }
                None => {
                    warn!(step = %step.id, document = %doc, "included document missing; omitted");
                    self.run_log.note(&format!(
                        "WARN: document '{doc}' not found; omitted from {} prompt",
                        step.id
                    ))?;
                    omitted.push(doc.clone());
                }
            }
        }

        let prompt = self.prompts.render(resolved.agent, &task, &included)?;
        let prompt_path = self
            .run_log
            .write_prompt(&resolved.entry.label(), &prompt)?;
        Ok(Ok(PreparedPrompt {
            prompt,
            prompt_path,
            omitted,
        }))
    }

    fn result(
        &self,
        resolved: &ResolvedStep<'_>,
        prepared: PreparedPrompt,
        status: StepStatus,
        output: Option<&InvokeOutput>,
        condition_passed: Option<bool>,
        started: Instant,
    ) -> StepResult {
        StepResult {
            step_id: resolved.step.id.clone(),
            iteration: resolved.entry.iteration,
            tool: resolved.handle.tool.clone(),
            session: resolved.handle.session,
            continued: resolved.handle.continuing,
            command: resolved.invocation.display(),
            prompt: prepared.prompt,
            prompt_path: prepared.prompt_path,
            output: output.map(|o| o.stdout.clone()).unwrap_or_default(),
            exit_code: output.and_then(|o| o.exit_code),
            status,
            condition_passed,
            omitted_documents: prepared.omitted,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn run_manual(
        &mut self,
        resolved: &ResolvedStep<'_>,
        manual: &ManualInstruction,
        prepared: PreparedPrompt,
        started: Instant,
    ) -> Result<StepFlow> {
        self.manual = true;
        let step = resolved.step;
        self.run_log.note(&format!(
            "MANUAL {}: {}",
            resolved.entry.label(),
            manual.display()
        ))?;
        for line in &manual.lines {
            self.run_log.note(&format!("  {line}"))?;
        }
        self.run_log.note(&format!(
            "  prompt saved to {}",
            prepared.prompt_path.display()
        ))?;
        if let Some(condition) = &step.condition {
            warn!(step = %step.id, "condition not enforced for manual tool");
            self.run_log.note(&format!(
                "  condition {} is advisory for {}",
                condition.check.describe(),
                resolved.handle.tool
            ))?;
        }
        if let Some(doc) = &step.output_document {
            self.run_log.note(&format!(
                "  save the agent's answer to {} before the next step",
                self.documents.path_for(doc).display()
            ))?;
        }
        let result = self.result(resolved, prepared, StepStatus::Manual, None, None, started);
        self.results.push(result);
        Ok(StepFlow::Continue)
    }

    fn run_exec(
        &mut self,
        resolved: &ResolvedStep<'_>,
        command: &CommandLine,
        prepared: PreparedPrompt,
        started: Instant,
    ) -> Result<StepFlow> {
        let step = resolved.step;
        self.run_log.note(&format!(
            "step {}: $ {}",
            resolved.entry.label(),
            command.display()
        ))?;

        let request = InvokeRequest {
            workdir: self.ctx.target_dir.clone(),
            step_id: step.id.clone(),
            iteration: resolved.entry.iteration,
            command: command.clone(),
            prompt: prepared.prompt.clone(),
            timeout: Duration::from_secs(self.config.step_timeout_secs),
            output_limit_bytes: self.config.output_limit_bytes,
            log_path: Some(self.run_log.paths().log_path.clone()),
            echo: self.run_log.echo(),
        };
        let output = match self.invoker.invoke(&request) {
            Ok(output) => output,
            Err(err) => {
                let result =
                    self.result(resolved, prepared, StepStatus::Failed, None, None, started);
                self.results.push(result);
                return self.fail(RunFailure::Execution {
                    recipe: self.recipe.id.clone(),
                    step: step.id.clone(),
                    message: format!("{err:#}"),
                });
            }
        };

        if !output.success() {
            let message = if output.timed_out {
                format!(
                    "agent timed out after {}s",
                    self.config.step_timeout_secs
                )
            } else {
                let code = output
                    .exit_code
                    .map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
                format!(
                    "agent exited with {code}: {}",
                    excerpt(&output.stderr, EXCERPT_CHARS)
                )
            };
            let result = self.result(
                resolved,
                prepared,
                StepStatus::Failed,
                Some(&output),
                None,
                started,
            );
            self.results.push(result);
            return self.fail(RunFailure::Execution {
                recipe: self.recipe.id.clone(),
                step: step.id.clone(),
                message,
            });
        }

        if output.stdout_truncated > 0 {
            let message = format!(
                "agent output is {} bytes over output_limit_bytes ({}); raise the limit to keep the full output",
                output.stdout_truncated, self.config.output_limit_bytes
            );
            let result = self.result(
                resolved,
                prepared,
                StepStatus::Failed,
                Some(&output),
                None,
                started,
            );
            self.results.push(result);
            return self.fail(RunFailure::Execution {
                recipe: self.recipe.id.clone(),
                step: step.id.clone(),
                message,
            });
        }

        if let Some(doc) = &step.output_document {
            let path = self.documents.write(doc, &output.stdout)?;
            self.run_log
                .note(&format!("  wrote {}", path.display()))?;
        }
        if resolved.entry.iteration.is_some() {
            self.looping.record(&step.id, &output.stdout);
        }

        let mut condition_passed = None;
        let mut condition_failure = None;
        if let Some(condition) = &step.condition {
            let verdict = match evaluate_step_condition(condition, &output.stdout, self.checks) {
                Ok(verdict) => verdict,
                Err(err) if condition.kind == ConditionKind::Always => {
                    warn!(step = %step.id, err = %format!("{err:#}"), "advisory check errored");
                    Verdict::Recorded { passed: false }
                }
                Err(err) => Verdict::Fail {
                    reason: format!("{err:#}"),
                },
            };
            match verdict {
                Verdict::Pass => {
                    condition_passed = Some(true);
                    self.run_log
                        .note(&format!("  condition passed: {}", condition.check.describe()))?;
                }
                Verdict::Recorded { passed } => {
                    condition_passed = Some(passed);
                    if !passed {
                        warn!(step = %step.id, "advisory condition did not pass");
                    }
                    self.run_log.note(&format!(
                        "  condition {} (not enforced): {}",
                        condition.check.describe(),
                        if passed { "passed" } else { "did not pass" }
                    ))?;
                }
                Verdict::Fail { reason } => {
                    condition_passed = Some(false);
                    condition_failure = Some(RunFailure::Condition {
                        recipe: self.recipe.id.clone(),
                        step: step.id.clone(),
                        reason,
                        excerpt: excerpt(&output.stdout, EXCERPT_CHARS),
                    });
                }
            }
        }

        let status = if condition_failure.is_some() {
            StepStatus::Failed
        } else {
            StepStatus::Succeeded
        };
        let result = self.result(
            resolved,
            prepared,
            status,
            Some(&output),
            condition_passed,
            started,
        );
        self.results.push(result);
        match condition_failure {
            Some(failure) => self.fail(failure),
            None => Ok(StepFlow::Continue),
        }
    }
}

impl<I: ToolInvoker + ?Sized, C: CommandCheck + ?Sized> StepSink for StepExecutor<'_, I, C> {
    #[instrument(skip_all, fields(step = %resolved.entry.step_id, iteration = ?resolved.entry.iteration))]
    fn step(&mut self, resolved: &ResolvedStep<'_>) -> Result<StepFlow> {
        let started = Instant::now();
        let step = resolved.step;
        info!(
            agent = %step.agent,
            session = resolved.handle.session,
            continuing = resolved.handle.continuing,
            "step started"
        );
        if step.wait_for_confirmation {
            info!(step = %step.id, "waitForConfirmation bypassed for automated run");
            self.run_log
                .note(&format!("step {}: confirmation bypassed", step.id))?;
        }

        let prepared = match self.prepare_prompt(resolved)? {
            Ok(prepared) => prepared,
            Err(failure) => return self.fail(failure),
        };

        match &resolved.invocation {
            ToolInvocation::Manual(manual) => self.run_manual(resolved, manual, prepared, started),
            ToolInvocation::Exec(command) => self.run_exec(resolved, command, prepared, started),
        }
    }

    fn iteration_end(
        &mut self,
        iteration: u32,
        condition: Option<&LoopCondition>,
    ) -> Result<LoopFlow> {
        if self.manual {
            if condition.is_some() {
                warn!(iteration, "loop condition not evaluated for manual tool");
            }
            return Ok(LoopFlow::Repeat);
        }
        let flow = self
            .looping
            .finish_iteration(iteration, condition, self.checks)?;
        if flow == LoopFlow::Exit {
            self.run_log.note(&format!(
                "loop exit condition met after iteration {iteration}"
            ))?;
        }
        Ok(flow)
    }
}
