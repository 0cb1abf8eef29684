//! End-to-end orchestration scenarios with scripted agents.
//!
//! These tests drive `Orchestrator::run` against a temp project, replacing the
//! agent CLIs with a `ScriptedInvoker` so outputs, failures and loop exits are
//! deterministic.

use std::fs;

use recipe_runner::core::recipe::Recipe;
use recipe_runner::error::{DefinitionError, RunFailure};
use recipe_runner::io::config::{MissingDocumentPolicy, RunnerConfig};
use recipe_runner::orchestrator::{Orchestrator, RunRequest, RunResult};
use recipe_runner::step::StepStatus;
use recipe_runner::test_support::{
    FixedCheck, ScriptedInvoker, ScriptedReply, StaticAgents, TestWorkspace, recipe_from_yaml,
};

const HANDOFF: &str = r#"
id: handoff
version: "1"
description: Analyze, then implement from the analysis
steps:
  - id: analyze
    agent: architect
    task: Analyze the repository.
    outputDocument: notes/analysis.md
  - id: implement
    agent: dev
    task: Implement what the analysis proposes.
    includeDocuments: [notes/analysis.md]
"#;

const REVIEW_LOOP: &str = r#"
id: review-loop
version: "1"
description: Implement, then review and fix until approved
steps:
  - id: implement
    agent: dev
    task: Implement the feature.
  - id: review
    agent: reviewer
    task: Review the change.
  - id: fix
    agent: dev
    task: Fix the review findings.
  - id: ship
    agent: dev
    task: Write the release note.
loop:
  steps: [review, fix]
  maxIterations: 4
  condition:
    step: review
    check:
      type: contains
      value: APPROVED
"#;

fn request(tool: &str) -> RunRequest {
    RunRequest {
        tool: Some(tool.to_string()),
        ..RunRequest::default()
    }
}

fn run_with(
    workspace: &TestWorkspace,
    recipe: &Recipe,
    invoker: &ScriptedInvoker,
    request: &RunRequest,
) -> anyhow::Result<RunResult> {
    let ctx = workspace.context();
    let agents = StaticAgents::any();
    Orchestrator::new(&ctx, workspace.config(), &agents, invoker, &FixedCheck(true))
        .run(recipe, request)
}

fn run(workspace: &TestWorkspace, recipe: &Recipe, invoker: &ScriptedInvoker) -> RunResult {
    run_with(workspace, recipe, invoker, &request("claude")).expect("run")
}

#[test]
fn analysis_document_is_handed_to_the_next_step() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(HANDOFF);
    let analysis = "## Analysis\nUse the existing session store.\n";
    let invoker = ScriptedInvoker::new().reply("analyze", ScriptedReply::ok(analysis));

    let result = run(&workspace, &recipe, &invoker);

    assert!(result.success, "{:?}", result.failure);
    assert_eq!(
        workspace
            .documents()
            .read("notes/analysis.md")
            .expect("read")
            .as_deref(),
        Some(analysis)
    );
    let prompt = &invoker.prompts_for("implement")[0];
    assert!(prompt.contains(analysis));
    assert!(prompt.contains("<document path=\"notes/analysis.md\">"));
    assert!(prompt.starts_with("<agent id=\"dev\">"));
    assert!(result.steps[1].omitted_documents.is_empty());
}

#[test]
fn missing_include_is_omitted_without_placeholder() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut recipe = recipe_from_yaml(HANDOFF);
    recipe.steps[0].output_document = None;
    let invoker = ScriptedInvoker::new();

    let result = run(&workspace, &recipe, &invoker);

    assert!(result.success);
    let prompt = &invoker.prompts_for("implement")[0];
    assert!(!prompt.contains("<document"));
    assert!(!prompt.contains("notes/analysis.md"));
    assert_eq!(result.steps[1].omitted_documents, vec!["notes/analysis.md"]);
}

#[test]
fn required_include_halts_before_the_agent_runs() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut recipe = recipe_from_yaml(HANDOFF);
    recipe.steps[0].output_document = None;
    recipe.steps[1].require_documents = true;
    let invoker = ScriptedInvoker::new();

    let result = run(&workspace, &recipe, &invoker);

    assert!(!result.success);
    assert_eq!(invoker.invoked(), vec!["analyze"]);
    assert_eq!(
        result.failure,
        Some(RunFailure::MissingDocument {
            recipe: "handoff".to_string(),
            step: "implement".to_string(),
            document: "notes/analysis.md".to_string(),
        })
    );
}

#[test]
fn error_policy_applies_to_every_step() {
    let mut workspace = TestWorkspace::new().expect("workspace");
    workspace
        .set_config(RunnerConfig {
            missing_documents: MissingDocumentPolicy::Error,
            ..RunnerConfig::default()
        })
        .expect("config");
    let mut recipe = recipe_from_yaml(HANDOFF);
    recipe.steps[0].output_document = None;
    let invoker = ScriptedInvoker::new();

    let result = run(&workspace, &recipe, &invoker);

    assert!(matches!(
        result.failure,
        Some(RunFailure::MissingDocument { .. })
    ));
}

#[test]
fn loop_without_condition_runs_max_iterations() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut recipe = recipe_from_yaml(REVIEW_LOOP);
    if let Some(spec) = recipe.loop_spec.as_mut() {
        spec.condition = None;
        spec.max_iterations = Some(3);
    }
    let invoker = ScriptedInvoker::new();

    let result = run(&workspace, &recipe, &invoker);

    assert!(result.success);
    assert_eq!(
        invoker.invoked(),
        vec![
            "implement", "review#1", "fix#1", "review#2", "fix#2", "review#3", "fix#3", "ship"
        ]
    );
    assert_eq!(result.loop_iterations, Some(3));
}

#[test]
fn loop_stops_after_the_approving_iteration() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(REVIEW_LOOP);
    let invoker = ScriptedInvoker::new()
        .reply("review", ScriptedReply::ok("Two issues remain."))
        .reply("review", ScriptedReply::ok("APPROVED with nits."));

    let result = run(&workspace, &recipe, &invoker);

    assert!(result.success);
    assert_eq!(
        invoker.invoked(),
        vec!["implement", "review#1", "fix#1", "review#2", "fix#2", "ship"]
    );
    assert_eq!(result.loop_iterations, Some(2));
    let log = fs::read_to_string(&result.log_path).expect("read log");
    assert!(log.contains("loop exit condition met after iteration 2"));
}

#[test]
fn iteration_cap_bounds_max_iterations() {
    let mut workspace = TestWorkspace::new().expect("workspace");
    workspace
        .set_config(RunnerConfig {
            loop_iteration_cap: 1,
            ..RunnerConfig::default()
        })
        .expect("config");
    let recipe = recipe_from_yaml(REVIEW_LOOP);
    let invoker = ScriptedInvoker::new();

    let result = run(&workspace, &recipe, &invoker);

    assert_eq!(invoker.invoked(), vec!["implement", "review#1", "fix#1", "ship"]);
    assert_eq!(result.loop_iterations, Some(1));
}

#[test]
fn separate_strategy_opens_a_fresh_session_per_step() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(HANDOFF);
    let result = run(&workspace, &recipe, &ScriptedInvoker::new());

    let sessions: Vec<(u32, bool)> = result
        .steps
        .iter()
        .map(|step| (step.session, step.continued))
        .collect();
    assert_eq!(sessions, vec![(1, false), (2, false)]);
    assert_eq!(result.steps[1].command, "claude -p < <prompt>");
}

#[test]
fn continue_strategy_reuses_the_previous_session() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut recipe = recipe_from_yaml(REVIEW_LOOP);
    recipe.conversation_strategy = recipe_runner::core::recipe::ConversationStrategy::Continue;
    recipe.steps[3].continue_conversation = false;
    recipe.loop_spec = None;
    let invoker = ScriptedInvoker::new();

    let result = run(&workspace, &recipe, &invoker);

    let sessions: Vec<(&str, u32, bool)> = result
        .steps
        .iter()
        .map(|step| (step.step_id.as_str(), step.session, step.continued))
        .collect();
    assert_eq!(
        sessions,
        vec![
            ("implement", 1, false),
            ("review", 1, true),
            ("fix", 1, true),
            ("ship", 2, false),
        ]
    );
    let requests = invoker.requests();
    assert_eq!(requests[1].command.args, vec!["-p", "--continue"]);
    assert_eq!(requests[3].command.args, vec!["-p"]);
}

#[test]
fn deny_wins_over_allow_for_autonomous_tools() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(
        r#"
id: guarded
version: "1"
description: Autonomous run with tool restrictions
toolOptions:
  copilot:
    allowTools: [shell, write, shell]
    denyTools: [shell]
    denyPaths: [secrets]
steps:
  - id: build
    agent: dev
    task: Build it.
"#,
    );
    let invoker = ScriptedInvoker::new();

    let result = run_with(&workspace, &recipe, &invoker, &request("copilot")).expect("run");

    assert!(result.success);
    assert_eq!(
        result.steps[0].command,
        "copilot --allow-tool write --deny-tool shell --deny-path secrets -p <prompt>"
    );
    let args = &invoker.requests()[0].command.args;
    assert!(!args.windows(2).any(|pair| pair == ["--allow-tool", "shell"]));
}

#[test]
fn non_zero_exit_halts_the_run() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(HANDOFF);
    let invoker = ScriptedInvoker::new().reply("analyze", ScriptedReply::exit(3, "rate limited"));

    let result = run(&workspace, &recipe, &invoker);

    assert!(!result.success);
    assert_eq!(invoker.invoked(), vec!["analyze"]);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].status, StepStatus::Failed);
    assert_eq!(result.steps[0].exit_code, Some(3));
    match &result.failure {
        Some(RunFailure::Execution { recipe, step, message }) => {
            assert_eq!(recipe, "handoff");
            assert_eq!(step, "analyze");
            assert!(message.contains("status 3"), "{message}");
            assert!(message.contains("rate limited"), "{message}");
        }
        other => panic!("expected execution failure, got {other:?}"),
    }
    assert!(
        workspace
            .documents()
            .read("notes/analysis.md")
            .expect("read")
            .is_none()
    );
}

#[test]
fn timeout_and_spawn_errors_are_execution_failures() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(HANDOFF);

    let invoker = ScriptedInvoker::new().reply("analyze", ScriptedReply::timeout());
    let result = run(&workspace, &recipe, &invoker);
    assert!(
        matches!(&result.failure, Some(RunFailure::Execution { message, .. }) if message.contains("timed out"))
    );

    let invoker = ScriptedInvoker::new().reply(
        "analyze",
        ScriptedReply::SpawnError("agent binary 'claude' not found on PATH".to_string()),
    );
    let result = run(&workspace, &recipe, &invoker);
    assert!(
        matches!(&result.failure, Some(RunFailure::Execution { message, .. }) if message.contains("not found on PATH"))
    );
}

#[test]
fn failed_condition_names_the_check_and_an_excerpt() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut recipe = recipe_from_yaml(
        r#"
id: checked
version: "1"
description: Output must not mention errors
steps:
  - id: build
    agent: dev
    task: Build it.
    condition:
      type: on-failure
      check:
        type: regex
        pattern: "(?i)error"
  - id: never
    agent: dev
    task: Not reached.
"#,
    );
    recipe.tools = vec!["claude".to_string()];
    let invoker = ScriptedInvoker::new().reply("build", ScriptedReply::ok("Build ERROR: missing crate"));

    let result = run(&workspace, &recipe, &invoker);

    assert_eq!(invoker.invoked(), vec!["build"]);
    assert_eq!(result.steps[0].condition_passed, Some(false));
    match &result.failure {
        Some(RunFailure::Condition { step, reason, excerpt, .. }) => {
            assert_eq!(step, "build");
            assert!(reason.contains("regex /(?i)error/"), "{reason}");
            assert_eq!(excerpt, "Build ERROR: missing crate");
        }
        other => panic!("expected condition failure, got {other:?}"),
    }
}

#[test]
fn advisory_condition_never_halts() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut recipe = recipe_from_yaml(HANDOFF);
    recipe.steps[0].condition = Some(recipe_runner::core::recipe::StepCondition {
        kind: recipe_runner::core::recipe::ConditionKind::Always,
        check: recipe_runner::core::recipe::Check::Contains {
            value: "never present".to_string(),
        },
    });

    let result = run(&workspace, &recipe, &ScriptedInvoker::new());

    assert!(result.success);
    assert_eq!(result.steps[0].condition_passed, Some(false));
    assert_eq!(result.steps[0].status, StepStatus::Succeeded);
}

#[test]
fn variables_resolve_before_anything_runs() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(
        r#"
id: vars
version: "1"
description: Variable resolution
variables:
  recipe_runner_test_feature: The feature to build
  recipe_runner_test_branch:
    default: main
steps:
  - id: build
    agent: dev
    task: Build {{recipe_runner_test_feature}} on {{recipe_runner_test_branch}}.
"#,
    );

    let invoker = ScriptedInvoker::new();
    let err = run_with(&workspace, &recipe, &invoker, &request("claude")).unwrap_err();
    let definition = err.downcast_ref::<DefinitionError>().expect("definition error");
    assert!(definition.problems[0].contains("recipe_runner_test_feature"));
    assert!(invoker.invoked().is_empty());
    assert!(!workspace.context().logs_root.exists());

    let mut with_value = request("claude");
    with_value
        .variables
        .insert("recipe_runner_test_feature".to_string(), "login".to_string());
    let result = run_with(&workspace, &recipe, &invoker, &with_value).expect("run");
    assert!(result.success);
    assert!(invoker.prompts_for("build")[0].contains("Build login on main."));
}

#[test]
fn unsupported_tool_and_unknown_agent_are_definition_errors() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut recipe = recipe_from_yaml(HANDOFF);
    recipe.tools = vec!["copilot".to_string()];
    let ctx = workspace.context();
    let agents = StaticAgents::only(&["architect"]);
    let invoker = ScriptedInvoker::new();

    let err = Orchestrator::new(&ctx, workspace.config(), &agents, &invoker, &FixedCheck(true))
        .run(&recipe, &request("claude"))
        .unwrap_err();

    let definition = err.downcast_ref::<DefinitionError>().expect("definition error");
    assert_eq!(definition.problems.len(), 2, "{:?}", definition.problems);
    assert!(invoker.invoked().is_empty());
}

#[test]
fn missing_variables_are_reported_with_every_other_problem() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(
        r#"
id: vars-and-agents
version: "1"
description: Two problems at once
variables:
  recipe_runner_test_missing: Never supplied
steps:
  - id: build
    agent: ghost
    task: Build {{recipe_runner_test_missing}}.
"#,
    );
    let ctx = workspace.context();
    let invoker = ScriptedInvoker::new();

    let err = Orchestrator::new(
        &ctx,
        workspace.config(),
        &StaticAgents::only(&["dev"]),
        &invoker,
        &FixedCheck(true),
    )
    .run(&recipe, &request("claude"))
    .unwrap_err();

    let definition = err.downcast_ref::<DefinitionError>().expect("definition error");
    assert_eq!(definition.problems.len(), 2, "{:?}", definition.problems);
    assert!(definition.problems[0].contains("unknown agent 'ghost'"));
    assert!(definition.problems[1].contains(
        "missing value for variable 'recipe_runner_test_missing' (Never supplied)"
    ));
    assert!(invoker.invoked().is_empty());
}

#[test]
fn empty_variable_value_is_accepted() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(
        r#"
id: empty-var
version: "1"
description: Empty values are values
variables:
  recipe_runner_test_suffix: Appended to the task
steps:
  - id: build
    agent: dev
    task: Build it{{recipe_runner_test_suffix}}.
"#,
    );
    let invoker = ScriptedInvoker::new();
    let mut with_empty = request("claude");
    with_empty
        .variables
        .insert("recipe_runner_test_suffix".to_string(), String::new());

    let result = run_with(&workspace, &recipe, &invoker, &with_empty).expect("run");

    assert!(result.success, "{:?}", result.failure);
    assert!(invoker.prompts_for("build")[0].contains("<task>\nBuild it.\n</task>"));
}

#[test]
fn padding_inside_a_value_survives_at_the_task_edges() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(
        r#"
id: padded
version: "1"
description: Only the raw task is trimmed
variables:
  recipe_runner_test_item: What to build
steps:
  - id: build
    agent: dev
    task: "  {{recipe_runner_test_item}} then ship {{recipe_runner_test_item}}  "
"#,
    );
    let invoker = ScriptedInvoker::new();
    let mut padded = request("claude");
    padded
        .variables
        .insert("recipe_runner_test_item".to_string(), " parser ".to_string());

    let result = run_with(&workspace, &recipe, &invoker, &padded).expect("run");

    assert!(result.success, "{:?}", result.failure);
    assert!(
        invoker.prompts_for("build")[0].contains("<task>\n parser  then ship  parser \n</task>")
    );
}

#[test]
fn output_over_the_limit_halts_without_writing_the_document() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(HANDOFF);
    let invoker =
        ScriptedInvoker::new().reply("analyze", ScriptedReply::truncated("## Analysis (cut", 4096));

    let result = run(&workspace, &recipe, &invoker);

    assert!(!result.success);
    match result.failure.as_ref().expect("failure") {
        RunFailure::Execution { step, message, .. } => {
            assert_eq!(step, "analyze");
            assert!(message.contains("4096 bytes over output_limit_bytes"), "{message}");
        }
        other => panic!("expected execution failure, got {other:?}"),
    }
    assert_eq!(result.steps[0].status, StepStatus::Failed);
    assert_eq!(
        workspace.documents().read("notes/analysis.md").expect("read"),
        None
    );
    assert_eq!(invoker.invoked(), vec!["analyze"]);
}

#[test]
fn manual_tool_renders_prompts_but_runs_nothing() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(REVIEW_LOOP);
    let invoker = ScriptedInvoker::new();

    let result = run_with(&workspace, &recipe, &invoker, &request("cursor")).expect("run");

    assert!(result.success);
    assert!(invoker.invoked().is_empty());
    assert!(result.steps.iter().all(|step| step.status == StepStatus::Manual));
    assert_eq!(result.steps.len(), 1 + 2 * 4 + 1);
    assert!(result.steps.iter().all(|step| step.prompt_path.is_file()));
    assert!(result.steps[0].command.starts_with("# manual: cursor"));
}

#[test]
fn summary_and_prompts_are_written_next_to_the_log() {
    let workspace = TestWorkspace::new().expect("workspace");
    let recipe = recipe_from_yaml(HANDOFF);

    let result = run(&workspace, &recipe, &ScriptedInvoker::new());

    assert!(result.log_path.is_file());
    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&result.summary_path).expect("read summary"))
            .expect("parse summary");
    assert_eq!(summary["recipe_id"], "handoff");
    assert_eq!(summary["success"], true);
    assert_eq!(summary["steps"].as_array().map(Vec::len), Some(2));
    assert_eq!(
        fs::read_to_string(&result.steps[0].prompt_path).expect("read prompt"),
        result.steps[0].prompt
    );
    assert_eq!(workspace.log_files("json").expect("logs").len(), 1);
}
