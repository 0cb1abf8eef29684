//! Command building for the supported tool families.
//!
//! Each family lives in its own module; [`build_invocation`] is the single entry
//! point both backends use, so a new family is one new variant plus one module.

mod autonomous;
mod interactive;
mod manual;

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::agent::Agent;
use crate::core::conversation::ConversationHandle;
use crate::core::recipe::ToolOptions;

/// Class of external CLI automation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolFamily {
    /// Prompt on stdin, continuation via a flag.
    InteractivePiped,
    /// Prompt as an argument plus discrete automation flags.
    FlagRichAutonomous,
    /// No non-interactive entry point; a human follows instructions.
    ManualInstruction,
}

impl ToolFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolFamily::InteractivePiped => "interactive-piped",
            ToolFamily::FlagRichAutonomous => "flag-rich-autonomous",
            ToolFamily::ManualInstruction => "manual-instruction",
        }
    }
}

/// How a tool is invoked. Configured under `[tools.<name>]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProfile {
    pub family: ToolFamily,
    /// Executable name or path. Unused by the manual family.
    #[serde(default)]
    pub program: String,
    /// Arguments always passed after the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Arguments appended when continuing an active conversation.
    #[serde(default)]
    pub continue_args: Vec<String>,
    /// Flag that precedes the prompt argument (flag-rich family only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_flag: Option<String>,
}

impl ToolProfile {
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.family != ToolFamily::ManualInstruction && self.program.trim().is_empty() {
            return Err(anyhow!(
                "tools.{name}.program must be set for the {} family",
                self.family.as_str()
            ));
        }
        if let Some(flag) = &self.prompt_flag
            && flag.trim().is_empty()
        {
            return Err(anyhow!("tools.{name}.prompt_flag must be non-empty when set"));
        }
        Ok(())
    }
}

/// Built-in tool profiles, one per family.
pub fn default_profiles() -> BTreeMap<String, ToolProfile> {
    let mut tools = BTreeMap::new();
    tools.insert(
        "claude".to_string(),
        ToolProfile {
            family: ToolFamily::InteractivePiped,
            program: "claude".to_string(),
            args: vec!["-p".to_string()],
            continue_args: vec!["--continue".to_string()],
            prompt_flag: None,
        },
    );
    tools.insert(
        "copilot".to_string(),
        ToolProfile {
            family: ToolFamily::FlagRichAutonomous,
            program: "copilot".to_string(),
            args: Vec::new(),
            continue_args: vec!["--continue".to_string()],
            prompt_flag: Some("-p".to_string()),
        },
    );
    tools.insert(
        "cursor".to_string(),
        ToolProfile {
            family: ToolFamily::ManualInstruction,
            program: String::new(),
            args: Vec::new(),
            continue_args: Vec::new(),
            prompt_flag: None,
        },
    );
    tools
}

/// Where the rendered prompt goes when the command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PromptDelivery {
    Stdin,
    /// Passed as the argument following this flag.
    Flag(String),
}

/// A concrete executable invocation, minus the prompt payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub prompt: PromptDelivery,
}

impl CommandLine {
    /// Shell-quoted program, arguments and prompt flag (if any).
    pub fn shell_prefix(&self) -> String {
        let mut words: Vec<&str> = Vec::with_capacity(self.args.len() + 2);
        words.push(&self.program);
        words.extend(self.args.iter().map(String::as_str));
        if let PromptDelivery::Flag(flag) = &self.prompt {
            words.push(flag);
        }
        shell_words::join(words)
    }

    pub fn display(&self) -> String {
        match self.prompt {
            PromptDelivery::Stdin => format!("{} < <prompt>", self.shell_prefix()),
            PromptDelivery::Flag(_) => format!("{} <prompt>", self.shell_prefix()),
        }
    }
}

/// Instructions for a tool that has no automation entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualInstruction {
    pub tool: String,
    pub agent: String,
    pub continuing: bool,
    pub lines: Vec<String>,
}

impl ManualInstruction {
    pub fn display(&self) -> String {
        let chat = if self.continuing {
            "continue chat"
        } else {
            "new chat"
        };
        format!("# manual: {} ({chat}, agent {})", self.tool, self.agent)
    }
}

/// Result of command building for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ToolInvocation {
    Exec(CommandLine),
    Manual(ManualInstruction),
}

impl ToolInvocation {
    /// Resolved command line; identical for live runs and emitted scripts.
    pub fn display(&self) -> String {
        match self {
            ToolInvocation::Exec(cmd) => cmd.display(),
            ToolInvocation::Manual(manual) => manual.display(),
        }
    }
}

/// Everything the builder needs for one step.
#[derive(Debug, Clone, Copy)]
pub struct InvocationRequest<'a> {
    pub tool: &'a str,
    pub agent: &'a Agent,
    pub handle: &'a ConversationHandle,
    pub options: Option<&'a ToolOptions>,
}

/// Build the invocation for `request` using the tool's family.
pub fn build_invocation(profile: &ToolProfile, request: &InvocationRequest<'_>) -> ToolInvocation {
    match profile.family {
        ToolFamily::InteractivePiped => ToolInvocation::Exec(interactive::build(profile, request)),
        ToolFamily::FlagRichAutonomous => ToolInvocation::Exec(autonomous::build(profile, request)),
        ToolFamily::ManualInstruction => ToolInvocation::Manual(manual::build(request)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profiles_cover_every_family() {
        let profiles = default_profiles();
        for (name, profile) in &profiles {
            profile.validate(name).expect("valid default profile");
        }
        let families: Vec<ToolFamily> = profiles.values().map(|p| p.family).collect();
        assert!(families.contains(&ToolFamily::InteractivePiped));
        assert!(families.contains(&ToolFamily::FlagRichAutonomous));
        assert!(families.contains(&ToolFamily::ManualInstruction));
    }

    #[test]
    fn exec_profile_requires_program() {
        let profile = ToolProfile {
            family: ToolFamily::InteractivePiped,
            program: " ".to_string(),
            args: Vec::new(),
            continue_args: Vec::new(),
            prompt_flag: None,
        };
        let err = profile.validate("broken").unwrap_err();
        assert!(err.to_string().contains("tools.broken.program"));
    }

    #[test]
    fn display_quotes_arguments() {
        let cmd = CommandLine {
            program: "copilot".to_string(),
            args: vec!["--deny-tool".to_string(), "shell(rm *)".to_string()],
            prompt: PromptDelivery::Flag("-p".to_string()),
        };
        assert_eq!(cmd.display(), "copilot --deny-tool 'shell(rm *)' -p <prompt>");

        let piped = CommandLine {
            program: "claude".to_string(),
            args: vec!["-p".to_string()],
            prompt: PromptDelivery::Stdin,
        };
        assert_eq!(piped.display(), "claude -p < <prompt>");
    }
}
