//! Recipe data model and the semantic invariants JSON Schema cannot express.
//!
//! A recipe is immutable once loaded. Field names follow the camelCase keys of
//! the YAML source.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::template::placeholders;

/// Whether consecutive steps share a conversation with their agent tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStrategy {
    #[default]
    Separate,
    Continue,
}

/// A declarative multi-step workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Tools this recipe declares support for. Empty means any configured tool.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub conversation_strategy: ConversationStrategy,
    /// Keyed by tool name or tool family name.
    #[serde(default)]
    pub tool_options: BTreeMap<String, ToolOptions>,
    #[serde(default)]
    pub variables: BTreeMap<String, VariableSpec>,
    pub steps: Vec<Step>,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_spec: Option<LoopSpec>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Recipe {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn supports_tool(&self, tool: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == tool)
    }

    /// Options for `tool`, preferring a tool-name entry over a family-name entry.
    pub fn options_for(&self, tool: &str, family: &str) -> Option<&ToolOptions> {
        self.tool_options
            .get(tool)
            .or_else(|| self.tool_options.get(family))
    }
}

/// Automation flags for tool families that expose a flag-driven surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolOptions {
    pub allow_all_tools: bool,
    pub allow_all_paths: bool,
    pub allow_tools: Vec<String>,
    pub deny_tools: Vec<String>,
    pub allow_paths: Vec<String>,
    pub deny_paths: Vec<String>,
    pub add_dirs: Vec<String>,
}

/// Declaration of a `{{name}}` placeholder.
///
/// A bare string is a description and makes the variable required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableSpec {
    Described(String),
    Detailed {
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        default: Option<String>,
    },
}

impl VariableSpec {
    pub fn default_value(&self) -> Option<&str> {
        match self {
            VariableSpec::Described(_) => None,
            VariableSpec::Detailed { default, .. } => default.as_deref(),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            VariableSpec::Described(text) => Some(text),
            VariableSpec::Detailed { description, .. } => description.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub agent: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_document: Option<String>,
    #[serde(default)]
    pub include_documents: Vec<String>,
    /// Treat a missing included document as a hard error for this step.
    #[serde(default)]
    pub require_documents: bool,
    #[serde(default = "default_true")]
    pub continue_conversation: bool,
    /// Reserved; automated runs always bypass it.
    #[serde(default)]
    pub wait_for_confirmation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
}

fn default_true() -> bool {
    true
}

/// How a check result maps onto step success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionKind {
    /// Step passes when the check passes.
    #[default]
    OnSuccess,
    /// Step passes when the check does not pass.
    OnFailure,
    /// Check is evaluated and logged, never enforced.
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCondition {
    #[serde(rename = "type", default)]
    pub kind: ConditionKind,
    pub check: Check,
}

/// Predicate over a step's captured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Check {
    Contains { value: String },
    Regex { pattern: String },
    Command { cmd: String },
}

impl Check {
    /// Short human-readable form used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Check::Contains { value } => format!("contains {value:?}"),
            Check::Regex { pattern } => format!("regex /{pattern}/"),
            Check::Command { cmd } => format!("command `{cmd}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSpec {
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<LoopCondition>,
}

/// Exit condition checked after each full loop iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopCondition {
    /// Step whose output is checked; defaults to the last step of the iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub check: Check,
}

/// Check recipe invariants that JSON Schema cannot express:
/// - recipe and step ids are file-name safe; step ids are unique, agents non-empty
/// - loop steps exist, do not repeat, and `maxIterations >= 1`
/// - loop condition step is a loop member
/// - regex checks compile, command checks are non-empty
/// - every `{{placeholder}}` is a declared variable
/// - document paths are relative and stay inside the documents root
pub fn validate_recipe(recipe: &Recipe) -> Vec<String> {
    let mut errors = Vec::new();

    if !is_safe_id(&recipe.id) {
        errors.push(format!(
            "id '{}' must match [A-Za-z0-9][A-Za-z0-9_.-]*",
            recipe.id
        ));
    }
    if recipe.steps.is_empty() {
        errors.push("steps must contain at least one step".to_string());
    }

    for name in recipe.variables.keys() {
        if !is_identifier(name) {
            errors.push(format!(
                "variable '{name}' must match [A-Za-z_][A-Za-z0-9_]*"
            ));
        }
    }

    let mut seen = HashSet::new();
    for step in &recipe.steps {
        let at = format!("step '{}'", step.id);
        if !is_safe_id(&step.id) {
            errors.push(format!(
                "step id '{}' must match [A-Za-z0-9][A-Za-z0-9_.-]*",
                step.id
            ));
        } else if !seen.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.id));
        }
        if step.agent.trim().is_empty() {
            errors.push(format!("{at}: agent must be non-empty"));
        }
        for name in placeholders(&step.task) {
            if !recipe.variables.contains_key(&name) {
                errors.push(format!("{at}: task uses undeclared variable '{name}'"));
            }
        }
        if let Some(doc) = &step.output_document {
            validate_document_path(&at, doc, &mut errors);
        }
        for doc in &step.include_documents {
            validate_document_path(&at, doc, &mut errors);
        }
        if let Some(condition) = &step.condition {
            validate_check(&at, &condition.check, &mut errors);
        }
    }

    if let Some(spec) = &recipe.loop_spec {
        validate_loop(recipe, spec, &mut errors);
    }

    errors
}

fn validate_loop(recipe: &Recipe, spec: &LoopSpec, errors: &mut Vec<String>) {
    if spec.steps.is_empty() {
        errors.push("loop.steps must name at least one step".to_string());
    }
    let mut seen = HashSet::new();
    for id in &spec.steps {
        if recipe.step(id).is_none() {
            errors.push(format!("loop references unknown step '{id}'"));
        }
        if !seen.insert(id.as_str()) {
            errors.push(format!("loop lists step '{id}' more than once"));
        }
    }
    if spec.max_iterations == Some(0) {
        errors.push("loop.maxIterations must be > 0".to_string());
    }
    if let Some(condition) = &spec.condition {
        if let Some(step) = &condition.step
            && !spec.steps.contains(step)
        {
            errors.push(format!(
                "loop condition checks step '{step}' which is not in loop.steps"
            ));
        }
        validate_check("loop condition", &condition.check, errors);
    }
}

fn validate_check(at: &str, check: &Check, errors: &mut Vec<String>) {
    match check {
        Check::Contains { value } if value.is_empty() => {
            errors.push(format!("{at}: contains check needs a non-empty value"));
        }
        Check::Regex { pattern } => {
            if let Err(err) = Regex::new(pattern) {
                errors.push(format!("{at}: invalid regex /{pattern}/: {err}"));
            }
        }
        Check::Command { cmd } if cmd.trim().is_empty() => {
            errors.push(format!("{at}: command check needs a non-empty cmd"));
        }
        _ => {}
    }
}

fn validate_document_path(at: &str, doc: &str, errors: &mut Vec<String>) {
    let path = Path::new(doc);
    if doc.trim().is_empty() {
        errors.push(format!("{at}: document path must be non-empty"));
        return;
    }
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        errors.push(format!(
            "{at}: document path '{doc}' must be relative and stay inside the documents directory"
        ));
    }
}

/// Ids end up in file names and shell words, so they stay in a narrow alphabet.
fn is_safe_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
