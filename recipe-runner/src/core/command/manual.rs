//! Manual-instruction family: a human carries out the step.

use super::{InvocationRequest, ManualInstruction};

pub(super) fn build(request: &InvocationRequest<'_>) -> ManualInstruction {
    let chat = if request.handle.continuing {
        "Continue the current chat".to_string()
    } else {
        "Start a new chat".to_string()
    };
    let lines = vec![
        format!("Open {} in the target project.", request.tool),
        format!("{chat} with the '{}' agent.", request.agent.id),
        "Paste the prompt below and wait for the agent to finish.".to_string(),
    ];
    ManualInstruction {
        tool: request.tool.to_string(),
        agent: request.agent.id.clone(),
        continuing: request.handle.continuing,
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::Agent;
    use crate::core::conversation::ConversationHandle;

    #[test]
    fn instructions_name_tool_agent_and_chat_mode() {
        let agent = Agent {
            id: "architect".to_string(),
            ..Agent::default()
        };
        let handle = ConversationHandle {
            tool: "cursor".to_string(),
            session: 2,
            continuing: true,
        };
        let manual = build(&InvocationRequest {
            tool: "cursor",
            agent: &agent,
            handle: &handle,
            options: None,
        });
        let text = manual.lines.join("\n");
        assert!(text.contains("Open cursor"));
        assert!(text.contains("Continue the current chat with the 'architect' agent."));
        assert_eq!(manual.display(), "# manual: cursor (continue chat, agent architect)");
    }
}
