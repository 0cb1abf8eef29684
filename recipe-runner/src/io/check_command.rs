//! `command` checks: `sh -c <cmd>` with the captured output on stdin.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::condition::CommandCheck;
use crate::io::process::run_command_with_timeout;

pub struct ShellCheckRunner {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ShellCheckRunner {
    pub fn new(workdir: &Path, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            timeout,
            output_limit_bytes,
        }
    }
}

impl CommandCheck for ShellCheckRunner {
    /// Exit 0 passes. A timed-out check counts as not passing.
    #[instrument(skip_all, fields(cmd))]
    fn run_check(&self, cmd: &str, output: &str) -> Result<bool> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd).current_dir(&self.workdir);
        let result = run_command_with_timeout(
            command,
            Some(output.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("spawn sh for check command")?;

        if result.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "check command timed out");
            return Ok(false);
        }
        let passed = result.status.success();
        debug!(passed, exit_code = ?result.status.code(), "check command finished");
        Ok(passed)
    }
}
