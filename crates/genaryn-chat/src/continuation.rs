//! Resuming assistant messages that were cut short

use genaryn_ai::{ChatMessage, MessageStatus, Role};

use crate::conversation::Conversation;
use crate::error::{Error, Result};

/// Instruction sent after the truncated content
pub const DEFAULT_CONTINUE_INSTRUCTION: &str = "Continue your previous response exactly where it stopped. \
Do not repeat any text you already wrote and do not add a preamble.";

/// Build the history for a follow-up request over a truncated last message.
///
/// The truncated content goes out as the assistant's prior utterance,
/// followed by `instruction` as a user turn.
pub fn continuation_history(conversation: &Conversation, instruction: &str) -> Result<Vec<ChatMessage>> {
    match conversation.last() {
        Some(last) if last.status == MessageStatus::Truncated => {}
        Some(last) if last.is_streaming() => return Err(Error::Busy),
        Some(last) => {
            return Err(Error::invalid_state(format!(
                "last message is {:?}, only truncated messages can be continued",
                last.status
            )));
        }
        None => return Err(Error::invalid_state("conversation is empty")),
    }

    let mut history = conversation.history();
    history.push(ChatMessage::new(Role::User, instruction));
    Ok(history)
}
