//! Explicit per-run directory layout.

use std::path::{Path, PathBuf};

use crate::io::config::RunnerConfig;

/// Where a run reads and writes. Built once from config; nothing else looks
/// up paths on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Project root; agents and check commands run here.
    pub target_dir: PathBuf,
    /// Root for `outputDocument` / `includeDocuments` paths.
    pub docs_root: PathBuf,
    /// Run logs, summaries and saved prompts.
    pub logs_root: PathBuf,
}

impl RunContext {
    pub fn new(target_dir: &Path, cfg: &RunnerConfig) -> Self {
        Self {
            target_dir: target_dir.to_path_buf(),
            docs_root: target_dir.join(&cfg.documents_dir),
            logs_root: target_dir.join(&cfg.logs_dir),
        }
    }
}
