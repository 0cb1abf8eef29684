//! Step prompt rendering.
//!
//! The head (agent persona, rules and task) comes from a template. Included
//! documents are appended as delimited blocks; the script backend prints the
//! same delimiters from shell, so both produce byte-identical prompts.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::agent::Agent;

const STEP_TEMPLATE: &str = include_str!("prompts/step.md");

/// A document whose content is inlined into a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedDocument {
    pub path: String,
    pub content: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptRenderer {
    env: Environment<'static>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("step", STEP_TEMPLATE)
            .expect("step template should be valid");
        Self { env }
    }

    /// Agent block followed by the task block, without documents.
    pub fn render_head(&self, agent: &Agent, task: &str) -> Result<String> {
        let template = self.env.get_template("step")?;
        let rendered = template.render(context! {
            agent => agent,
            task => task,
        })?;
        Ok(rendered)
    }

    pub fn render(&self, agent: &Agent, task: &str, documents: &[IncludedDocument]) -> Result<String> {
        let mut prompt = self.render_head(agent, task)?;
        for doc in documents {
            prompt.push_str(&document_open(&doc.path));
            prompt.push_str(&doc.content);
            prompt.push_str(DOCUMENT_CLOSE);
        }
        Ok(prompt)
    }
}

/// Closing delimiter of a document block.
pub const DOCUMENT_CLOSE: &str = "\n</document>";

/// Opening delimiter of a document block, including the separating blank line.
pub fn document_open(path: &str) -> String {
    format!("\n\n<document path=\"{path}\">\n")
}
