//! Test-only helpers: deterministic recipes, agents, invokers and workspaces.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::agent::{Agent, AgentResolver};
use crate::core::condition::CommandCheck;
use crate::core::recipe::{ConversationStrategy, Recipe, Step};
use crate::io::config::{CONFIG_PATH, RunnerConfig, write_config};
use crate::io::context::RunContext;
use crate::io::documents::DocumentStore;
use crate::io::invoker::{InvokeOutput, InvokeRequest, ToolInvoker};
use crate::io::recipe_store::parse_recipe;

/// Create a deterministic step run by agent `dev` with task `do <id>`.
pub fn step(id: &str) -> Step {
    Step {
        id: id.to_string(),
        agent: "dev".to_string(),
        task: format!("do {id}"),
        output_document: None,
        include_documents: Vec::new(),
        require_documents: false,
        continue_conversation: true,
        wait_for_confirmation: false,
        condition: None,
    }
}

/// Create recipe `demo` with one [`step`] per id and no loop.
pub fn recipe_with_steps(ids: &[&str]) -> Recipe {
    Recipe {
        id: "demo".to_string(),
        version: "1.0".to_string(),
        description: "demo recipe".to_string(),
        tags: Vec::new(),
        tools: Vec::new(),
        conversation_strategy: ConversationStrategy::Separate,
        tool_options: BTreeMap::new(),
        variables: BTreeMap::new(),
        steps: ids.iter().map(|id| step(id)).collect(),
        loop_spec: None,
        metadata: BTreeMap::new(),
    }
}

/// Parse a recipe through the same path as the recipe store; panics if invalid.
pub fn recipe_from_yaml(yaml: &str) -> Recipe {
    parse_recipe(yaml, "test recipe").expect("test recipe should be valid")
}

/// In-memory agent registry.
#[derive(Debug, Clone)]
pub struct StaticAgents {
    known: Option<BTreeSet<String>>,
}

impl StaticAgents {
    /// Resolve only the listed ids.
    pub fn only(ids: &[&str]) -> Self {
        Self {
            known: Some(ids.iter().map(|id| id.to_string()).collect()),
        }
    }

    /// Resolve every id.
    pub fn any() -> Self {
        Self { known: None }
    }
}

impl AgentResolver for StaticAgents {
    fn resolve(&self, agent_id: &str) -> Result<Agent> {
        if let Some(known) = &self.known
            && !known.contains(agent_id)
        {
            bail!("unknown agent '{agent_id}'");
        }
        Ok(Agent {
            id: agent_id.to_string(),
            persona: format!("You are the {agent_id} agent."),
            rules: vec![format!("Stay in the {agent_id} role.")],
        })
    }
}

/// Command check with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedCheck(pub bool);

impl CommandCheck for FixedCheck {
    fn run_check(&self, _cmd: &str, _output: &str) -> Result<bool> {
        Ok(self.0)
    }
}

/// What a scripted invocation returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Output(InvokeOutput),
    /// The binary could not be started.
    SpawnError(String),
}

impl ScriptedReply {
    pub fn ok(stdout: &str) -> Self {
        ScriptedReply::Output(InvokeOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            timed_out: false,
            stdout_truncated: 0,
        })
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        ScriptedReply::Output(InvokeOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
            timed_out: false,
            stdout_truncated: 0,
        })
    }

    /// Exit 0, but `discarded` stdout bytes were cut off at the output limit.
    pub fn truncated(stdout: &str, discarded: usize) -> Self {
        ScriptedReply::Output(InvokeOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            timed_out: false,
            stdout_truncated: discarded,
        })
    }

    pub fn timeout() -> Self {
        ScriptedReply::Output(InvokeOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
            stdout_truncated: 0,
        })
    }
}

/// Invoker that replays queued replies per step id and records every request.
///
/// A step with no queued reply succeeds with stdout `<step> output`.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    replies: RefCell<BTreeMap<String, VecDeque<ScriptedReply>>>,
    requests: RefCell<Vec<InvokeRequest>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for the next invocation of `step`.
    pub fn reply(self, step: &str, reply: ScriptedReply) -> Self {
        self.replies
            .borrow_mut()
            .entry(step.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.borrow().clone()
    }

    /// Step ids in invocation order, with the iteration when looped.
    pub fn invoked(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| match request.iteration {
                Some(iteration) => format!("{}#{iteration}", request.step_id),
                None => request.step_id.clone(),
            })
            .collect()
    }

    pub fn prompts_for(&self, step: &str) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter(|request| request.step_id == step)
            .map(|request| request.prompt.clone())
            .collect()
    }
}

impl ToolInvoker for ScriptedInvoker {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutput> {
        self.requests.borrow_mut().push(request.clone());
        let reply = self
            .replies
            .borrow_mut()
            .get_mut(&request.step_id)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(ScriptedReply::Output(output)) => Ok(output),
            Some(ScriptedReply::SpawnError(message)) => Err(anyhow!(message)),
            None => Ok(InvokeOutput {
                exit_code: Some(0),
                stdout: format!("{} output", request.step_id),
                stderr: String::new(),
                timed_out: false,
                stdout_truncated: 0,
            }),
        }
    }
}

/// Temporary project root with the default directory layout.
pub struct TestWorkspace {
    dir: TempDir,
    config: RunnerConfig,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp workspace")?;
        Ok(Self {
            dir,
            config: RunnerConfig::default(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn context(&self) -> RunContext {
        RunContext::new(self.path(), &self.config)
    }

    pub fn documents(&self) -> DocumentStore {
        DocumentStore::new(&self.context().docs_root)
    }

    /// Replace the config in memory and on disk.
    pub fn set_config(&mut self, config: RunnerConfig) -> Result<()> {
        write_config(&self.path().join(CONFIG_PATH), &config)?;
        self.config = config;
        Ok(())
    }

    /// Write `recipes/<id>.yaml`.
    pub fn write_recipe(&self, id: &str, yaml: &str) -> Result<PathBuf> {
        let dir = self.config.recipes_path(self.path());
        write_file(&dir.join(format!("{id}.yaml")), yaml)
    }

    /// Write `.recipe-runner/agents/<id>.yaml`.
    pub fn write_agent(&self, id: &str, yaml: &str) -> Result<PathBuf> {
        let dir = self.config.agents_path(self.path());
        write_file(&dir.join(format!("{id}.yaml")), yaml)
    }

    /// Files directly under the logs directory with the given extension.
    pub fn log_files(&self, extension: &str) -> Result<Vec<PathBuf>> {
        let logs = self.context().logs_root;
        let mut files = Vec::new();
        for entry in fs::read_dir(&logs).with_context(|| format!("read {}", logs.display()))? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == extension) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn write_file(path: &Path, contents: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(path.to_path_buf())
}
