//! Tool invocation abstraction.
//!
//! The [`ToolInvoker`] trait decouples step execution from spawning real agent
//! CLIs. Tests use scripted invokers that return predetermined outputs without
//! spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::command::{CommandLine, PromptDelivery};
use crate::io::process::{StreamTarget, run_command_with_stream};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Working directory for the agent process (the project root).
    pub workdir: PathBuf,
    pub step_id: String,
    pub iteration: Option<u32>,
    pub command: CommandLine,
    /// Rendered prompt, delivered on stdin or after the prompt flag.
    pub prompt: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Run log that receives the streamed output.
    pub log_path: Option<PathBuf>,
    /// Echo the agent's output to the console while it runs.
    pub echo: bool,
}

/// What an invocation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvokeOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Stdout bytes discarded beyond `output_limit_bytes`.
    pub stdout_truncated: usize,
}

impl InvokeOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Abstraction over agent execution backends.
pub trait ToolInvoker {
    /// Run the command. `Err` means the command could not be started at all.
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutput>;
}

/// Invoker that spawns the configured program.
pub struct ProcessInvoker;

impl ToolInvoker for ProcessInvoker {
    #[instrument(skip_all, fields(step = %request.step_id, iteration = ?request.iteration, program = %request.command.program))]
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutput> {
        let program = which::which_in(
            &request.command.program,
            std::env::var_os("PATH"),
            &request.workdir,
        )
        .map_err(|err| {
            anyhow!(
                "agent binary '{}' not found on PATH: {err}",
                request.command.program
            )
        })?;
        info!(program = %program.display(), "starting agent");

        let mut cmd = Command::new(&program);
        cmd.args(&request.command.args)
            .current_dir(&request.workdir);
        let stdin = match &request.command.prompt {
            PromptDelivery::Stdin => Some(request.prompt.as_bytes()),
            PromptDelivery::Flag(flag) => {
                cmd.arg(flag).arg(&request.prompt);
                None
            }
        };

        let stream = request.log_path.as_ref().map(|log_path| StreamTarget {
            log_path: log_path.clone(),
            echo: request.echo,
        });
        let output = run_command_with_stream(
            cmd,
            stdin,
            request.timeout,
            request.output_limit_bytes,
            stream.as_ref(),
        )
        .with_context(|| format!("run {}", request.command.program))?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "agent timed out"
            );
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
        } else {
            debug!("agent completed successfully");
        }

        Ok(InvokeOutput {
            exit_code: output.status.code(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            timed_out: output.timed_out,
            stdout_truncated: output.stdout_truncated,
        })
    }
}
