//! Named text artifacts shared between steps.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Reads and writes documents under a single root directory.
///
/// Paths are validated at recipe load time to be relative and free of `..`.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn path_for(&self, doc: &str) -> PathBuf {
        self.root.join(doc)
    }

    /// Current content, or `None` if no step has written the document yet.
    pub fn read(&self, doc: &str) -> Result<Option<String>> {
        let path = self.path_for(doc);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read document {}", path.display())),
        }
    }

    /// Replace the document's content, creating parent directories as needed.
    pub fn write(&self, doc: &str, content: &str) -> Result<PathBuf> {
        let path = self.path_for(doc);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create document dir {}", parent.display()))?;
        }
        let mut tmp_name = path
            .file_name()
            .with_context(|| format!("document path has no file name {}", path.display()))?
            .to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        fs::write(&tmp_path, content)
            .with_context(|| format!("write temp document {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace document {}", path.display()))?;
        debug!(path = %path.display(), bytes = content.len(), "document written");
        Ok(path)
    }
}
