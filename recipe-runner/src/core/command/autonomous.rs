//! Flag-rich autonomous family: automation options become discrete flags.
//!
//! Deny entries always win: an allow entry that is also denied is dropped.

use super::{CommandLine, InvocationRequest, PromptDelivery, ToolProfile};

const DEFAULT_PROMPT_FLAG: &str = "-p";

pub(super) fn build(profile: &ToolProfile, request: &InvocationRequest<'_>) -> CommandLine {
    let mut args = profile.args.clone();
    if request.handle.continuing {
        args.extend(profile.continue_args.iter().cloned());
    }

    if let Some(options) = request.options {
        if options.allow_all_tools {
            args.push("--allow-all-tools".to_string());
        }
        if options.allow_all_paths {
            args.push("--allow-all-paths".to_string());
        }
        for dir in dedup(&options.add_dirs) {
            args.push("--add-dir".to_string());
            args.push(dir.to_string());
        }
        for tool in allowed(&options.allow_tools, &options.deny_tools) {
            args.push("--allow-tool".to_string());
            args.push(tool.to_string());
        }
        for tool in dedup(&options.deny_tools) {
            args.push("--deny-tool".to_string());
            args.push(tool.to_string());
        }
        for path in allowed(&options.allow_paths, &options.deny_paths) {
            args.push("--allow-path".to_string());
            args.push(path.to_string());
        }
        for path in dedup(&options.deny_paths) {
            args.push("--deny-path".to_string());
            args.push(path.to_string());
        }
    }

    let flag = profile
        .prompt_flag
        .clone()
        .unwrap_or_else(|| DEFAULT_PROMPT_FLAG.to_string());
    CommandLine {
        program: profile.program.clone(),
        args,
        prompt: PromptDelivery::Flag(flag),
    }
}

fn allowed<'a>(allow: &'a [String], deny: &[String]) -> Vec<&'a str> {
    dedup(allow)
        .into_iter()
        .filter(|entry| !deny.iter().any(|d| d == entry))
        .collect()
}

fn dedup(entries: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::with_capacity(entries.len());
    for entry in entries {
        if !out.contains(&entry.as_str()) {
            out.push(entry);
        }
    }
    out
}
