//! Standalone bash script backend.
//!
//! [`ScriptEmitter`] is the second [`StepSink`]: instead of running each
//! resolved step it appends a shell block that does the same thing. The skeleton
//! (logging, helpers, variable checks) comes from `templates/script.sh.j2`.
//!
//! Prompts are rebuilt at script run time so that variable values and
//! document contents are read when the script runs, not when it is generated.
//! The head is rendered here with placeholder sentinels and written as a
//! heredoc; documents are appended by the `include_doc` helper using the same
//! delimiters as [`crate::io::prompt`].

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::{Captures, Regex};
use tracing::debug;

use crate::core::command::{CommandLine, ManualInstruction, PromptDelivery, ToolInvocation};
use crate::core::recipe::{Check, ConditionKind, LoopCondition, Recipe, Step};
use crate::core::template::{Segment, parse_segments};
use crate::engine::{Engine, LoopFlow, ResolvedStep, StepFlow, StepSink};
use crate::exit_codes;
use crate::io::config::{MissingDocumentPolicy, RunnerConfig};
use crate::io::prompt::PromptRenderer;

const SCRIPT_TEMPLATE: &str = include_str!("templates/script.sh.j2");
const HEREDOC_END: &str = "RECIPE_PROMPT_EOF";
const VAR_OPEN: char = '\u{1}';
const VAR_CLOSE: char = '\u{2}';

static SENTINEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("\u{1}([A-Za-z_][A-Za-z0-9_]*)\u{2}").expect("sentinel regex is valid")
});

/// A generated script and the command lines it will run, in plan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedScript {
    pub text: String,
    pub commands: Vec<String>,
}

/// Serialize `engine`'s plan into a bash script.
pub fn emit_script(engine: &Engine<'_>, config: &RunnerConfig) -> Result<EmittedScript> {
    let mut emitter = ScriptEmitter::new(engine.recipe(), config);
    engine.drive(&mut emitter)?;
    let text = emitter.render(engine)?;
    debug!(
        recipe = %engine.recipe().id,
        tool = engine.tool(),
        bytes = text.len(),
        "script emitted"
    );
    Ok(EmittedScript {
        text,
        commands: emitter.commands,
    })
}

/// Script-building [`StepSink`].
pub struct ScriptEmitter<'a> {
    recipe: &'a Recipe,
    config: &'a RunnerConfig,
    prompts: PromptRenderer,
    blocks: Vec<String>,
    commands: Vec<String>,
    manual: bool,
}

impl<'a> ScriptEmitter<'a> {
    pub fn new(recipe: &'a Recipe, config: &'a RunnerConfig) -> Self {
        Self {
            recipe,
            config,
            prompts: PromptRenderer::new(),
            blocks: Vec::new(),
            commands: Vec::new(),
            manual: false,
        }
    }

    fn render(&self, engine: &Engine<'_>) -> Result<String> {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_template("script.sh.j2", SCRIPT_TEMPLATE)?;
        let template = env.get_template("script.sh.j2")?;

        let recipe = self.recipe;
        let description: Vec<&str> = recipe.description.lines().collect();
        let text = template.render(context! {
            recipe_id => recipe.id,
            recipe_id_q => quote(&recipe.id),
            version => recipe.version,
            version_q => quote(&recipe.version),
            tool => engine.tool(),
            tool_q => quote(engine.tool()),
            family => engine.profile().family.as_str(),
            description => description,
            docs_dir_q => quote(&self.config.documents_dir.to_string_lossy()),
            logs_dir_q => quote(&self.config.logs_dir.to_string_lossy()),
            entries => engine.plan().entries.len(),
            variables => self.variable_lines(),
            blocks => self.blocks,
        })?;
        Ok(text)
    }

    /// Apply defaults and check required variables before any step.
    ///
    /// A variable set to the empty string counts as set. Every missing one is
    /// reported before the script exits with the definition-error status.
    fn variable_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut required = Vec::new();
        for (name, spec) in &self.recipe.variables {
            match spec.default_value() {
                Some(default) => lines.push(format!(": ${{{name}={}}}", quote(default))),
                None => required.push((name, spec.description())),
            }
        }
        if required.is_empty() {
            return lines;
        }
        lines.push("MISSING_VARS=0".to_string());
        for (name, description) in required {
            let described = description
                .map(|text| format!(" ({})", text.trim()))
                .unwrap_or_default();
            let message = format!(
                "recipe '{}': missing value for variable '{name}'{described} (set ${name} in the environment)",
                self.recipe.id
            );
            lines.push(format!(
                "if [ -z \"${{{name}+set}}\" ]; then log {} >&2; MISSING_VARS=1; fi",
                quote(&message)
            ));
        }
        lines.push(format!(
            "if [ \"$MISSING_VARS\" -ne 0 ]; then exit {}; fi",
            exit_codes::INVALID
        ));
        lines
    }

    fn requires(&self, step: &Step) -> bool {
        step.require_documents || self.config.missing_documents == MissingDocumentPolicy::Error
    }

    /// Lines that write the step's prompt to `$PROMPT_FILE`.
    fn prompt_lines(&self, resolved: &ResolvedStep<'_>, lines: &mut Vec<String>) -> Result<()> {
        let step = resolved.step;
        let label = resolved.entry.label();

        if self.requires(step) {
            for doc in &step.include_documents {
                lines.push(format!("require_doc {} {}", quote(doc), quote(&step.id)));
            }
        }

        let head = self.prompts.render_head(resolved.agent, &sentinel_task(step.task.trim()))?;
        lines.push(format!(
            "PROMPT_FILE=\"$WORK_DIR\"/{}",
            quote(&format!("{label}.prompt.md"))
        ));
        let body = heredoc_body(&head);
        let end = heredoc_delimiter(&body);
        lines.push("{".to_string());
        lines.push(format!("printf '%s' \"$(cat <<{end}"));
        lines.push(body);
        lines.push(end);
        lines.push(")\"".to_string());
        for doc in &step.include_documents {
            lines.push(format!("include_doc {} {}", quote(doc), quote(&step.id)));
        }
        lines.push("} > \"$PROMPT_FILE\"".to_string());
        Ok(())
    }

    fn exec_lines(&self, resolved: &ResolvedStep<'_>, command: &CommandLine, lines: &mut Vec<String>) {
        let step = resolved.step;
        let label = resolved.entry.label();

        lines.push(format!(
            "OUTPUT_FILE=\"$WORK_DIR\"/{}",
            quote(&format!("{label}.out"))
        ));
        let invoke = match &command.prompt {
            PromptDelivery::Stdin => format!("{} < \"$PROMPT_FILE\"", command.shell_prefix()),
            PromptDelivery::Flag(_) => {
                format!("{} \"$(cat \"$PROMPT_FILE\")\"", command.shell_prefix())
            }
        };
        lines.push(format!("if ! {invoke} | tee \"$OUTPUT_FILE\"; then"));
        lines.push(format!(
            "  fail {} 'agent exited with a non-zero status'",
            quote(&step.id)
        ));
        lines.push("fi".to_string());
        let limit = self.config.output_limit_bytes;
        lines.push("OUTPUT_BYTES=$(wc -c < \"$OUTPUT_FILE\")".to_string());
        lines.push(format!("if [ \"$OUTPUT_BYTES\" -gt {limit} ]; then"));
        lines.push(format!(
            "  fail {} \"agent output is $((OUTPUT_BYTES - {limit})) bytes over output_limit_bytes ({limit}); raise the limit to keep the full output\"",
            quote(&step.id)
        ));
        lines.push("fi".to_string());

        if let Some(doc) = &step.output_document {
            let target = format!("\"$DOCS_DIR\"/{}", quote(doc));
            lines.push(format!("mkdir -p \"$(dirname {target})\""));
            lines.push(format!("cp \"$OUTPUT_FILE\" {target}"));
            lines.push(format!("log \"  wrote $DOCS_DIR/\"{}", quote(doc)));
        }

        if resolved.entry.iteration.is_some() {
            lines.push(format!(
                "cp \"$OUTPUT_FILE\" \"$WORK_DIR\"/{}",
                quote(&format!("latest-{}.out", step.id))
            ));
            lines.push("LAST_OUTPUT_FILE=\"$OUTPUT_FILE\"".to_string());
        }

        if let Some(condition) = &step.condition {
            let describe = condition.check.describe();
            lines.push("CHECK_PASSED=0".to_string());
            lines.push(format!(
                "if {}; then CHECK_PASSED=1; fi",
                check_test(&condition.check, "\"$OUTPUT_FILE\"")
            ));
            match condition.kind {
                ConditionKind::OnSuccess => {
                    lines.push(format!(
                        "[ \"$CHECK_PASSED\" -eq 1 ] || fail {} {}",
                        quote(&step.id),
                        quote(&format!("expected output to satisfy {describe}"))
                    ));
                    lines.push(format!("log {}", quote(&format!("  condition passed: {describe}"))));
                }
                ConditionKind::OnFailure => {
                    lines.push(format!(
                        "[ \"$CHECK_PASSED\" -eq 0 ] || fail {} {}",
                        quote(&step.id),
                        quote(&format!("expected output not to satisfy {describe}"))
                    ));
                    lines.push(format!("log {}", quote(&format!("  condition passed: {describe}"))));
                }
                ConditionKind::Always => {
                    lines.push(format!(
                        "if [ \"$CHECK_PASSED\" -eq 1 ]; then log {}; else log {}; fi",
                        quote(&format!("  condition {describe} (not enforced): passed")),
                        quote(&format!("  condition {describe} (not enforced): did not pass"))
                    ));
                }
            }
        }
    }

    fn manual_lines(&self, resolved: &ResolvedStep<'_>, manual: &ManualInstruction, lines: &mut Vec<String>) {
        let step = resolved.step;
        for line in &manual.lines {
            lines.push(format!("log {}", quote(&format!("  {line}"))));
        }
        lines.push("log \"  prompt saved to $PROMPT_FILE\"".to_string());
        if let Some(condition) = &step.condition {
            lines.push(format!(
                "log {}",
                quote(&format!(
                    "  condition {} is advisory for {}",
                    condition.check.describe(),
                    manual.tool
                ))
            ));
        }
        if let Some(doc) = &step.output_document {
            lines.push(format!(
                "log \"  save the agent's answer to $DOCS_DIR/\"{} \" before the next step\"",
                quote(doc)
            ));
        }
        lines.push(format!(
            "if [ -t 0 ]; then read -r -p {} _ || true; fi",
            quote(&format!("Press Enter when step {} is done... ", step.id))
        ));
    }
}

impl StepSink for ScriptEmitter<'_> {
    fn step(&mut self, resolved: &ResolvedStep<'_>) -> Result<StepFlow> {
        let entry = resolved.entry;
        let step = resolved.step;
        let label = entry.label();
        let display = resolved.invocation.display();

        let mut lines = vec![
            format!(
                "# ---- {label}: agent {}, session {} ({}) ----",
                step.agent,
                resolved.handle.session,
                if resolved.handle.continuing {
                    "continued"
                } else {
                    "new"
                }
            ),
            format!("# command: {display}"),
        ];
        let looped = entry.iteration.is_some();
        if looped {
            lines.push("if [ \"$LOOP_DONE\" -eq 0 ]; then".to_string());
        }

        match &resolved.invocation {
            ToolInvocation::Manual(_) => {
                lines.push(format!("log {}", quote(&format!("MANUAL {label}: {display}"))));
            }
            ToolInvocation::Exec(_) => {
                lines.push(format!("log {}", quote(&format!("step {label}: $ {display}"))));
            }
        }
        if step.wait_for_confirmation {
            lines.push(format!(
                "log {}",
                quote(&format!("step {}: confirmation bypassed", step.id))
            ));
        }
        self.prompt_lines(resolved, &mut lines)?;
        match &resolved.invocation {
            ToolInvocation::Manual(manual) => {
                self.manual = true;
                self.manual_lines(resolved, manual, &mut lines);
            }
            ToolInvocation::Exec(command) => self.exec_lines(resolved, command, &mut lines),
        }

        if looped {
            lines.push("fi".to_string());
        }
        self.blocks.push(lines.join("\n"));
        self.commands.push(display);
        Ok(StepFlow::Continue)
    }

    fn iteration_end(
        &mut self,
        iteration: u32,
        condition: Option<&LoopCondition>,
    ) -> Result<LoopFlow> {
        let Some(condition) = condition else {
            return Ok(LoopFlow::Repeat);
        };
        if self.manual {
            self.blocks.push(format!(
                "# ---- end of loop iteration {iteration}: condition not evaluated for manual tool ----"
            ));
            return Ok(LoopFlow::Repeat);
        }
        let file = match &condition.step {
            Some(step) => format!("\"$WORK_DIR\"/{}", quote(&format!("latest-{step}.out"))),
            None => "\"$LAST_OUTPUT_FILE\"".to_string(),
        };
        let lines = [
            format!("# ---- end of loop iteration {iteration} ----"),
            "if [ \"$LOOP_DONE\" -eq 0 ]; then".to_string(),
            format!("if {}; then", check_test(&condition.check, &file)),
            "LOOP_DONE=1".to_string(),
            format!(
                "log {}",
                quote(&format!("loop exit condition met after iteration {iteration}"))
            ),
            "fi".to_string(),
            "fi".to_string(),
        ];
        self.blocks.push(lines.join("\n"));
        Ok(LoopFlow::Repeat)
    }
}

fn quote(word: &str) -> String {
    shell_words::quote(word).into_owned()
}

/// Task text with each `{{name}}` replaced by a sentinel that survives
/// rendering and heredoc escaping.
fn sentinel_task(task: &str) -> String {
    parse_segments(task)
        .into_iter()
        .map(|segment| match segment {
            Segment::Text(text) => text,
            Segment::Variable(name) => format!("{VAR_OPEN}{name}{VAR_CLOSE}"),
        })
        .collect()
}

/// Heredoc terminator that no line of `body` equals.
fn heredoc_delimiter(body: &str) -> String {
    let mut candidate = HEREDOC_END.to_string();
    let mut suffix = 0;
    while body.lines().any(|line| line == candidate) {
        suffix += 1;
        candidate = format!("{HEREDOC_END}_{suffix}");
    }
    candidate
}

/// Escape text for an unquoted heredoc, then turn sentinels into `${name}`.
fn heredoc_body(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    SENTINEL_RE
        .replace_all(&escaped, |caps: &Captures<'_>| format!("${{{}}}", &caps[1]))
        .into_owned()
}

/// Shell test that succeeds when `check` passes for the output in `file`.
fn check_test(check: &Check, file: &str) -> String {
    match check {
        Check::Contains { value } => format!("grep -qF -- {} {file}", quote(value)),
        Check::Regex { pattern } => format!("grep -qE -- {} {file}", quote(pattern)),
        Check::Command { cmd } => format!("( {cmd} ) < {file}"),
    }
}
