//! Agent registry contract.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Resolved persona text and merged rules for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub rules: Vec<String>,
}

/// Looks up agents by the id a step references.
pub trait AgentResolver {
    fn resolve(&self, agent_id: &str) -> Result<Agent>;
}
