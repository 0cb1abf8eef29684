//! Agent definitions stored one per file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::debug;

use crate::core::agent::{Agent, AgentResolver};

/// `<id>.yaml` / `<id>.yml` holds `{ persona, rules }`; `<id>.md` is a bare persona.
#[derive(Debug, Clone)]
pub struct DirectoryAgentResolver {
    dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AgentFile {
    persona: String,
    rules: Vec<String>,
}

impl DirectoryAgentResolver {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

impl AgentResolver for DirectoryAgentResolver {
    fn resolve(&self, agent_id: &str) -> Result<Agent> {
        if agent_id.is_empty() || agent_id.contains(['/', '\\']) || agent_id.starts_with('.') {
            return Err(anyhow!("invalid agent id '{agent_id}'"));
        }

        for ext in ["yaml", "yml"] {
            let path = self.dir.join(format!("{agent_id}.{ext}"));
            if path.is_file() {
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("read agent {}", path.display()))?;
                let file: AgentFile = serde_yaml::from_str(&contents)
                    .with_context(|| format!("parse agent {}", path.display()))?;
                debug!(agent = agent_id, path = %path.display(), "agent resolved");
                return Ok(Agent {
                    id: agent_id.to_string(),
                    persona: file.persona,
                    rules: file.rules,
                });
            }
        }

        let md = self.dir.join(format!("{agent_id}.md"));
        if md.is_file() {
            let persona =
                fs::read_to_string(&md).with_context(|| format!("read agent {}", md.display()))?;
            return Ok(Agent {
                id: agent_id.to_string(),
                persona,
                rules: Vec::new(),
            });
        }

        Err(anyhow!(
            "unknown agent '{agent_id}' (no {agent_id}.yaml or {agent_id}.md in {})",
            self.dir.display()
        ))
    }
}
