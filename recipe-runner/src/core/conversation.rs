//! Per-tool conversation tracking for a single run.
//!
//! Handles live exactly as long as the manager; nothing is persisted.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::recipe::ConversationStrategy;

/// Identifies the conversation an invocation belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationHandle {
    pub tool: String,
    /// Run-local session number, starting at 1.
    pub session: u32,
    /// True when this invocation continues an already active session.
    pub continuing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConversationState {
    NoConversation,
    Active { session: u32 },
}

#[derive(Debug, Clone)]
pub struct ConversationManager {
    strategy: ConversationStrategy,
    states: BTreeMap<String, ConversationState>,
    last_session: u32,
}

impl ConversationManager {
    pub fn new(strategy: ConversationStrategy) -> Self {
        Self {
            strategy,
            states: BTreeMap::new(),
            last_session: 0,
        }
    }

    /// Handle for the next invocation of `tool`.
    ///
    /// Continues the active session only under the `continue` strategy when the
    /// step asks for it; otherwise opens a fresh session.
    pub fn next_handle(&mut self, tool: &str, continue_requested: bool) -> ConversationHandle {
        let state = self
            .states
            .get(tool)
            .copied()
            .unwrap_or(ConversationState::NoConversation);

        if self.strategy == ConversationStrategy::Continue
            && continue_requested
            && let ConversationState::Active { session } = state
        {
            return ConversationHandle {
                tool: tool.to_string(),
                session,
                continuing: true,
            };
        }

        self.last_session += 1;
        let session = self.last_session;
        self.states
            .insert(tool.to_string(), ConversationState::Active { session });
        ConversationHandle {
            tool: tool.to_string(),
            session,
            continuing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separate_strategy_always_starts_fresh() {
        let mut manager = ConversationManager::new(ConversationStrategy::Separate);
        let first = manager.next_handle("claude", true);
        let second = manager.next_handle("claude", true);
        assert!(!first.continuing);
        assert!(!second.continuing);
        assert_ne!(first.session, second.session);
    }

    #[test]
    fn continue_strategy_reuses_active_session() {
        let mut manager = ConversationManager::new(ConversationStrategy::Continue);
        let first = manager.next_handle("claude", true);
        let second = manager.next_handle("claude", true);
        assert!(!first.continuing, "first invocation is always fresh");
        assert!(second.continuing);
        assert_eq!(first.session, second.session);
    }

    #[test]
    fn opting_out_opens_a_new_session_that_later_steps_continue() {
        let mut manager = ConversationManager::new(ConversationStrategy::Continue);
        let first = manager.next_handle("claude", true);
        let fresh = manager.next_handle("claude", false);
        let after = manager.next_handle("claude", true);
        assert_ne!(first.session, fresh.session);
        assert!(!fresh.continuing);
        assert_eq!(after.session, fresh.session);
        assert!(after.continuing);
    }

    #[test]
    fn sessions_are_tracked_per_tool() {
        let mut manager = ConversationManager::new(ConversationStrategy::Continue);
        let claude = manager.next_handle("claude", true);
        let copilot = manager.next_handle("copilot", true);
        assert!(!copilot.continuing);
        let claude_again = manager.next_handle("claude", true);
        assert_eq!(claude_again.session, claude.session);
        assert!(claude_again.continuing);
    }
}
