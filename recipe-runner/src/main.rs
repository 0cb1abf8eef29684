//! Recipe workflow runner.
//!
//! Loads recipes from `<root>/recipes/`, resolves agents from
//! `<root>/.recipe-runner/agents/`, and either runs a recipe against an agent
//! CLI or writes an equivalent standalone bash script.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use recipe_runner::engine::Engine;
use recipe_runner::error::{ConfigError, DefinitionError};
use recipe_runner::exit_codes;
use recipe_runner::io::agents::DirectoryAgentResolver;
use recipe_runner::io::check_command::ShellCheckRunner;
use recipe_runner::io::config::{CONFIG_PATH, RunnerConfig, load_config};
use recipe_runner::io::context::RunContext;
use recipe_runner::io::invoker::ProcessInvoker;
use recipe_runner::io::recipe_store::{RecipeListing, RecipeStore};
use recipe_runner::logging;
use recipe_runner::orchestrator::{Orchestrator, RunRequest};
use recipe_runner::script::emit_script;

#[derive(Parser)]
#[command(
    name = "recipe-runner",
    version,
    about = "Run multi-step agent recipes or generate equivalent bash scripts"
)]
struct Cli {
    /// Project root holding recipes, agents, documents and logs.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a recipe against an agent tool.
    Run {
        recipe: String,
        /// Agent tool; defaults to `default_tool` from the config.
        tool: Option<String>,
        /// Recipe variable value (repeatable).
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Write the run log without echoing it to the console.
        #[arg(short, long)]
        quiet: bool,
    },
    /// Write a standalone bash script that runs the recipe.
    Generate {
        recipe: String,
        tool: Option<String>,
        /// Defaults to `<root>/<recipe>-<tool>.sh`.
        output: Option<PathBuf>,
    },
    /// List recipes with step count, loop and description.
    List,
    /// Check a recipe, its agents and its tools without running anything.
    Validate { recipe: String },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let project = Project::open(&cli.root)?;
    match cli.command {
        Command::Run {
            recipe,
            tool,
            vars,
            quiet,
        } => cmd_run(&project, &recipe, tool, vars, quiet),
        Command::Generate {
            recipe,
            tool,
            output,
        } => cmd_generate(&project, &recipe, tool, output),
        Command::List => cmd_list(&project),
        Command::Validate { recipe } => cmd_validate(&project, &recipe),
    }
}

/// Definition and configuration problems exit with `INVALID`; everything else with `FAILED`.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<DefinitionError>().is_some() || err.downcast_ref::<ConfigError>().is_some()
    {
        exit_codes::INVALID
    } else {
        exit_codes::FAILED
    }
}

/// Root directory plus its loaded config.
struct Project {
    root: PathBuf,
    config: RunnerConfig,
}

impl Project {
    fn open(root: &Path) -> Result<Self> {
        let config = load_config(&root.join(CONFIG_PATH))?;
        debug!(root = %root.display(), tool = %config.default_tool, "project opened");
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    fn recipes(&self) -> RecipeStore {
        RecipeStore::new(&self.config.recipes_path(&self.root))
    }

    fn agents(&self) -> DirectoryAgentResolver {
        DirectoryAgentResolver::new(&self.config.agents_path(&self.root))
    }

    fn tool_or_default(&self, tool: Option<String>) -> String {
        tool.unwrap_or_else(|| self.config.default_tool.clone())
    }
}

fn cmd_run(
    project: &Project,
    recipe_id: &str,
    tool: Option<String>,
    vars: Vec<(String, String)>,
    quiet: bool,
) -> Result<i32> {
    let recipe = project.recipes().load(recipe_id)?;
    let config = &project.config;
    let ctx = RunContext::new(&project.root, config);
    let agents = project.agents();
    let checks = ShellCheckRunner::new(
        &ctx.target_dir,
        Duration::from_secs(config.check_timeout_secs),
        config.output_limit_bytes,
    );
    let orchestrator = Orchestrator::new(&ctx, config, &agents, &ProcessInvoker, &checks);

    let request = RunRequest {
        tool: Some(project.tool_or_default(tool)),
        variables: vars.into_iter().collect::<BTreeMap<_, _>>(),
        echo: !quiet,
    };
    let result = orchestrator.run(&recipe, &request)?;

    if let Some(failure) = &result.failure {
        eprintln!("{failure}");
    }
    println!("log: {}", result.log_path.display());
    println!("summary: {}", result.summary_path.display());
    if result.success {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::FAILED)
    }
}

fn cmd_generate(
    project: &Project,
    recipe_id: &str,
    tool: Option<String>,
    output: Option<PathBuf>,
) -> Result<i32> {
    let recipe = project.recipes().load(recipe_id)?;
    let tool = project.tool_or_default(tool);
    let engine = Engine::prepare(
        &recipe,
        &tool,
        &project.config.tool_profiles(),
        &project.agents(),
        project.config.loop_iteration_cap,
    )?;
    let script = emit_script(&engine, &project.config)?;

    let path = output.unwrap_or_else(|| project.root.join(format!("{}-{tool}.sh", recipe.id)));
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, &script.text).with_context(|| format!("write {}", path.display()))?;
    make_executable(&path)?;

    println!(
        "wrote {} ({} steps for {tool})",
        path.display(),
        script.commands.len()
    );
    Ok(exit_codes::OK)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn cmd_list(project: &Project) -> Result<i32> {
    let store = project.recipes();
    let listings = store.list()?;
    if listings.is_empty() {
        println!("no recipes in {}", store.dir().display());
        return Ok(exit_codes::OK);
    }
    for listing in listings {
        match listing {
            RecipeListing::Valid(summary) => {
                let looping = match &summary.looping {
                    Some((steps, iterations)) => format!("loop {} x{iterations}", steps.join(",")),
                    None => "no loop".to_string(),
                };
                println!(
                    "{}\t{} steps\t{looping}\t{}",
                    summary.id, summary.steps, summary.description
                );
            }
            RecipeListing::Invalid { id, error } => {
                let first = error.lines().next().unwrap_or_default();
                println!("{id}\tINVALID\t{first}");
            }
        }
    }
    Ok(exit_codes::OK)
}

/// Load the recipe and prepare it for every tool it declares (or the default tool).
fn cmd_validate(project: &Project, recipe_id: &str) -> Result<i32> {
    let recipe = project.recipes().load(recipe_id)?;
    let tools = if recipe.tools.is_empty() {
        vec![project.config.default_tool.clone()]
    } else {
        recipe.tools.clone()
    };

    let profiles = project.config.tool_profiles();
    let agents = project.agents();
    let mut problems = Vec::new();
    for tool in &tools {
        match Engine::prepare(
            &recipe,
            tool,
            &profiles,
            &agents,
            project.config.loop_iteration_cap,
        ) {
            Ok(engine) => println!(
                "{}: ok for {tool} ({} plan entries)",
                recipe.id,
                engine.plan().entries.len()
            ),
            Err(err) => match err.downcast::<DefinitionError>() {
                Ok(definition) => {
                    for problem in definition.problems {
                        if !problems.contains(&problem) {
                            problems.push(problem);
                        }
                    }
                }
                Err(other) => return Err(other),
            },
        }
    }

    if problems.is_empty() {
        Ok(exit_codes::OK)
    } else {
        Err(DefinitionError::new(&recipe.id, problems).into())
    }
}

fn parse_var(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.is_empty() {
        return Err(format!("variable name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_vars() {
        let cli = Cli::parse_from([
            "recipe-runner",
            "--root",
            "/work",
            "run",
            "feature",
            "copilot",
            "--var",
            "feature=login page",
            "--var",
            "empty=",
            "--quiet",
        ]);
        assert_eq!(cli.root, PathBuf::from("/work"));
        match cli.command {
            Command::Run {
                recipe,
                tool,
                vars,
                quiet,
            } => {
                assert_eq!(recipe, "feature");
                assert_eq!(tool.as_deref(), Some("copilot"));
                assert_eq!(
                    vars,
                    vec![
                        ("feature".to_string(), "login page".to_string()),
                        ("empty".to_string(), String::new()),
                    ]
                );
                assert!(quiet);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_generate_defaults() {
        let cli = Cli::parse_from(["recipe-runner", "generate", "feature"]);
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(matches!(
            cli.command,
            Command::Generate {
                tool: None,
                output: None,
                ..
            }
        ));
    }

    #[test]
    fn root_is_accepted_after_the_subcommand() {
        let cli = Cli::parse_from(["recipe-runner", "list", "--root", "/work"]);
        assert_eq!(cli.root, PathBuf::from("/work"));
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn var_without_equals_is_rejected() {
        assert!(Cli::try_parse_from(["recipe-runner", "run", "r", "--var", "novalue"]).is_err());
    }

    #[test]
    fn definition_and_config_errors_exit_invalid() {
        let definition: anyhow::Error = DefinitionError::single("r", "bad").into();
        assert_eq!(exit_code_for(&definition), exit_codes::INVALID);

        let config: anyhow::Error = ConfigError {
            path: PathBuf::from("config.toml"),
            message: "bad".to_string(),
        }
        .into();
        assert_eq!(
            exit_code_for(&config.context("load config")),
            exit_codes::INVALID
        );

        assert_eq!(
            exit_code_for(&anyhow::anyhow!("spawn failed")),
            exit_codes::FAILED
        );
    }
}
