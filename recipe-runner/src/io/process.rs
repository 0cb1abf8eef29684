//! Helpers for running child processes with timeouts and bounded output.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Where streamed output goes while the child runs.
#[derive(Debug, Clone)]
pub struct StreamTarget {
    /// Appended to line by line.
    pub log_path: PathBuf,
    /// Also copy stdout to our stdout and stderr to our stderr.
    pub echo: bool,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
pub fn run_command_with_timeout(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    run_command_with_stream(cmd, stdin, timeout, output_limit_bytes, None)
}

/// Like [`run_command_with_timeout`], but every line of stdout and stderr is also appended to
/// `stream.log_path` (flushed per line) and optionally echoed.
///
/// The full output is still returned in `CommandOutput`, subject to the limit.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes, streaming = stream.is_some()))]
pub fn run_command_with_stream(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    stream: Option<&StreamTarget>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let log_file = match stream {
        Some(target) => Some(open_append(&target.log_path)?),
        None => None,
    };
    let tee = Arc::new(Tee {
        file: log_file.map(Mutex::new),
        echo: stream.is_some_and(|t| t.echo),
    });

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            // The child may exit without reading everything; a broken pipe is not our failure.
            Some(thread::spawn(move || {
                if let Err(e) = child_stdin.write_all(&input)
                    && e.kind() != ErrorKind::BrokenPipe
                {
                    warn!(err = %e, "failed to write child stdin");
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_tee = tee.clone();
    let stdout_handle = thread::spawn(move || {
        read_stream_limited_with_tee(stdout, output_limit_bytes, &stdout_tee, Channel::Stdout)
    });
    let stderr_tee = tee.clone();
    let stderr_handle = thread::spawn(move || {
        read_stream_limited_with_tee(stderr, output_limit_bytes, &stderr_tee, Channel::Stderr)
    });

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    if let Some(handle) = stdin_handle
        && handle.join().is_err()
    {
        warn!("stdin writer thread panicked");
    }
    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create stream dir {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open stream file {}", path.display()))
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Stdout,
    Stderr,
}

struct Tee {
    file: Option<Mutex<File>>,
    echo: bool,
}

impl Tee {
    fn write_line(&self, line: &[u8], channel: Channel) {
        if let Some(mutex) = &self.file
            && let Ok(mut file) = mutex.lock()
            && let Err(e) = file.write_all(line).and_then(|()| file.flush())
        {
            warn!(err = %e, "failed to write to stream file");
        }
        if self.echo {
            let result = match channel {
                Channel::Stdout => std::io::stdout().lock().write_all(line),
                Channel::Stderr => std::io::stderr().lock().write_all(line),
            };
            if let Err(e) = result {
                debug!(err = %e, "failed to echo child output");
            }
        }
    }
}

/// Read a stream line by line with a size limit, tee-ing each line as it arrives.
fn read_stream_limited_with_tee<R: Read>(
    reader: R,
    limit: usize,
    tee: &Tee,
    channel: Channel,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        tee.write_line(&line, channel);

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_from_stdin() {
        let output = run_command_with_timeout(
            Command::new("cat"),
            Some(b"hello\nworld\n"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run cat");
        assert!(output.status.success());
        assert_eq!(output.stdout_lossy(), "hello\nworld\n");
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let output = run_command_with_timeout(
            Command::new("cat"),
            Some(b"0123456789"),
            Duration::from_secs(10),
            4,
        )
        .expect("run cat");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_command_with_timeout(cmd, None, Duration::from_millis(100), 1024)
            .expect("run sleep");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[test]
    fn streams_both_channels_to_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("logs").join("run.log");
        std::fs::create_dir_all(log_path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&log_path, "header\n").expect("seed log");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2");
        let output = run_command_with_stream(
            cmd,
            None,
            Duration::from_secs(10),
            1024,
            Some(&StreamTarget {
                log_path: log_path.clone(),
                echo: false,
            }),
        )
        .expect("run sh");

        assert_eq!(output.stdout_lossy(), "out\n");
        assert_eq!(output.stderr_lossy(), "err\n");
        let log = std::fs::read_to_string(&log_path).expect("read log");
        assert!(log.starts_with("header\n"));
        assert!(log.contains("out\n"));
        assert!(log.contains("err\n"));
    }
}
