//! Conversation update types

use genaryn_ai::{Message, MessageStatus};
use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;

/// Kind of state transition that produced an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// A message was appended
    Append,
    /// The streaming message received text
    Delta,
    /// The streaming message completed
    Complete,
    /// The streaming message stopped with partial content
    Truncate,
    /// The streaming message stopped without content
    Fail,
    /// A truncated message went back to streaming
    Resume,
    /// The transcript was emptied
    Clear,
}

impl Transition {
    /// Transition that moves a streaming message into `status`
    pub fn for_status(status: MessageStatus) -> Self {
        match status {
            MessageStatus::Streaming => Transition::Delta,
            MessageStatus::Complete => Transition::Complete,
            MessageStatus::Truncated => Transition::Truncate,
            MessageStatus::Failed => Transition::Fail,
        }
    }

    /// Check if this transition ends a stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Transition::Complete | Transition::Truncate | Transition::Fail
        )
    }
}

/// Delivered to subscribers after every transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationUpdate {
    pub transition: Transition,
    /// Transcript right after the transition
    pub conversation: Conversation,
}

impl ConversationUpdate {
    /// Message the transition applied to
    pub fn message(&self) -> Option<&Message> {
        self.conversation.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_status() {
        assert_eq!(Transition::for_status(MessageStatus::Streaming), Transition::Delta);
        assert_eq!(Transition::for_status(MessageStatus::Truncated), Transition::Truncate);
        assert!(Transition::for_status(MessageStatus::Failed).is_terminal());
        assert!(!Transition::Append.is_terminal());
    }

    #[test]
    fn test_update_serializes() {
        let update = ConversationUpdate {
            transition: Transition::Append,
            conversation: Conversation {
                messages: vec![Message::user("status report")],
            },
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["transition"], "append");
        assert_eq!(json["conversation"]["messages"][0]["content"], "status report");
    }
}
