//! Run log, summary and saved prompts under the logs directory.
//!
//! These are product artifacts, always written, unaffected by `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

/// `YYYYmmdd-HHMMSS`, shared by the log, summary and prompt directory names.
pub fn run_stamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d-%H%M%S").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogPaths {
    pub log_path: PathBuf,
    pub summary_path: PathBuf,
    /// Saved prompts, one file per plan entry.
    pub work_dir: PathBuf,
}

impl RunLogPaths {
    pub fn new(logs_root: &Path, recipe_id: &str, stamp: &str) -> Self {
        let stem = format!("{recipe_id}-{stamp}");
        Self {
            log_path: logs_root.join(format!("{stem}.log")),
            summary_path: logs_root.join(format!("{stem}.json")),
            work_dir: logs_root.join(stem),
        }
    }
}

/// Append-only, human-readable log of one run.
#[derive(Debug, Clone)]
pub struct RunLog {
    paths: RunLogPaths,
    echo: bool,
}

impl RunLog {
    /// Create the log directories and start the log file.
    pub fn create(paths: RunLogPaths, echo: bool) -> Result<Self> {
        fs::create_dir_all(&paths.work_dir)
            .with_context(|| format!("create run dir {}", paths.work_dir.display()))?;
        Ok(Self { paths, echo })
    }

    pub fn paths(&self) -> &RunLogPaths {
        &self.paths
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    /// Timestamped line, appended to the log and echoed to the console.
    pub fn note(&self, message: &str) -> Result<()> {
        let line = format!("[{}] {message}\n", Local::now().format("%H:%M:%S"));
        if self.echo {
            print!("{line}");
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.log_path)
            .with_context(|| format!("open run log {}", self.paths.log_path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("write run log {}", self.paths.log_path.display()))
    }

    /// Save a rendered prompt as `<label>.prompt.md` in the work dir.
    pub fn write_prompt(&self, label: &str, prompt: &str) -> Result<PathBuf> {
        let path = self.paths.work_dir.join(format!("{label}.prompt.md"));
        fs::write(&path, prompt).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(summary).context("serialize run summary")?;
        buf.push('\n');
        fs::write(&self.paths.summary_path, buf)
            .with_context(|| format!("write {}", self.paths.summary_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stamp_and_paths_share_a_stem() {
        let now = Local
            .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
            .single()
            .expect("unambiguous time");
        let stamp = run_stamp(now);
        assert_eq!(stamp, "20260304-050607");

        let paths = RunLogPaths::new(Path::new("/logs"), "feature", &stamp);
        assert_eq!(paths.log_path, Path::new("/logs/feature-20260304-050607.log"));
        assert_eq!(paths.summary_path, Path::new("/logs/feature-20260304-050607.json"));
        assert_eq!(paths.work_dir, Path::new("/logs/feature-20260304-050607"));
    }

    #[test]
    fn notes_prompts_and_summary_are_written() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::create(RunLogPaths::new(temp.path(), "demo", "stamp"), false)
            .expect("create");

        log.note("first").expect("note");
        log.note("second").expect("note");
        let prompt = log.write_prompt("01-analyze", "prompt body").expect("prompt");
        log.write_summary(&serde_json::json!({ "success": true }))
            .expect("summary");

        let text = fs::read_to_string(&log.paths().log_path).expect("read log");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] first"));
        assert_eq!(fs::read_to_string(prompt).expect("read prompt"), "prompt body");
        assert!(log.paths().summary_path.is_file());
    }
}
