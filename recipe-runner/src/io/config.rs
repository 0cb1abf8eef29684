//! Runner configuration stored under `.recipe-runner/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::command::{ToolProfile, default_profiles};
use crate::error::ConfigError;

/// Location of the config file relative to the project root.
pub const CONFIG_PATH: &str = ".recipe-runner/config.toml";

/// What happens when a step includes a document that does not exist yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingDocumentPolicy {
    /// Leave the document out of the prompt and log a warning.
    #[default]
    Omit,
    /// Halt the run.
    Error,
}

/// Runner configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to the
/// values in [`RunnerConfig::default`]; relative directories resolve against
/// the project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    pub recipes_dir: PathBuf,
    pub agents_dir: PathBuf,
    pub documents_dir: PathBuf,
    pub logs_dir: PathBuf,

    /// Tool used when `run`/`generate` are not given one.
    pub default_tool: String,

    /// Wall-clock limit for a single agent invocation.
    pub step_timeout_secs: u64,

    /// Wall-clock limit for a `command` check.
    pub check_timeout_secs: u64,

    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,

    /// Upper bound on loop iterations regardless of `maxIterations`.
    pub loop_iteration_cap: u32,

    pub missing_documents: MissingDocumentPolicy,

    /// Profiles merged over the built-in ones, keyed by tool name.
    pub tools: BTreeMap<String, ToolProfile>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            recipes_dir: PathBuf::from("recipes"),
            agents_dir: PathBuf::from(".recipe-runner/agents"),
            documents_dir: PathBuf::from(".recipe-docs"),
            logs_dir: PathBuf::from(".recipe-logs"),
            default_tool: "claude".to_string(),
            step_timeout_secs: 30 * 60,
            check_timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
            loop_iteration_cap: 10,
            missing_documents: MissingDocumentPolicy::Omit,
            tools: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        for (key, dir) in [
            ("recipes_dir", &self.recipes_dir),
            ("agents_dir", &self.agents_dir),
            ("documents_dir", &self.documents_dir),
            ("logs_dir", &self.logs_dir),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(anyhow!("{key} must be non-empty"));
            }
        }
        if self.default_tool.trim().is_empty() {
            return Err(anyhow!("default_tool must be non-empty"));
        }
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.check_timeout_secs == 0 {
            return Err(anyhow!("check_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.loop_iteration_cap == 0 {
            return Err(anyhow!("loop_iteration_cap must be > 0"));
        }
        for (name, profile) in &self.tools {
            profile.validate(name)?;
        }
        Ok(())
    }

    /// Built-in profiles with configured ones layered on top.
    pub fn tool_profiles(&self) -> BTreeMap<String, ToolProfile> {
        let mut profiles = default_profiles();
        for (name, profile) in &self.tools {
            profiles.insert(name.clone(), profile.clone());
        }
        profiles
    }

    pub fn recipes_path(&self, root: &Path) -> PathBuf {
        root.join(&self.recipes_dir)
    }

    pub fn agents_path(&self, root: &Path) -> PathBuf {
        root.join(&self.agents_dir)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`. A file that does
/// not parse or validate is a [`ConfigError`].
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let invalid = |message: String| ConfigError {
        path: path.to_path_buf(),
        message,
    };
    let cfg: RunnerConfig = toml::from_str(&contents).map_err(|err| invalid(err.to_string()))?;
    cfg.validate().map_err(|err| invalid(format!("{err:#}")))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
