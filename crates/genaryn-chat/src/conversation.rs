//! Conversation transcript and the state machine that guards it

use genaryn_ai::{Assembler, ChatMessage, Message, MessageStatus};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::Transition;

/// Read-only copy of a transcript.
///
/// Insertion order is turn order is display order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The message currently receiving deltas, if any
    pub fn streaming(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_streaming())
    }

    /// Whether new submissions are blocked
    pub fn is_busy(&self) -> bool {
        self.streaming().is_some()
    }

    /// Messages that belong in a request history.
    ///
    /// Failed and streaming messages carry nothing the model should see.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| matches!(m.status, MessageStatus::Complete | MessageStatus::Truncated))
            .map(Message::to_chat_message)
            .collect()
    }
}

/// Mutable transcript owned by a single session.
///
/// Invariant: at most one message is `streaming`, and it is the last one.
#[derive(Debug, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    next_index: u64,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn is_busy(&self) -> bool {
        self.messages.last().is_some_and(Message::is_streaming)
    }

    /// Append a message, assigning its sequence index.
    ///
    /// Rejected with [`Error::Busy`] while a message is streaming.
    pub fn append(&mut self, message: Message) -> Result<&Message> {
        if self.is_busy() {
            return Err(Error::Busy);
        }

        let message = message.with_sequence_index(self.next_index);
        self.next_index += 1;
        self.messages.push(message);
        Ok(&self.messages[self.messages.len() - 1])
    }

    /// Replace content and status of the streaming message with `partial`.
    ///
    /// Role and sequence index of the stored message are kept.
    pub fn update_streaming(&mut self, partial: &Message) -> Result<Transition> {
        let current = self
            .messages
            .last_mut()
            .filter(|m| m.is_streaming())
            .ok_or_else(|| Error::invalid_state("no streaming message to update"))?;

        current.content.clone_from(&partial.content);
        current.status = partial.status;
        current.error.clone_from(&partial.error);
        Ok(Transition::for_status(current.status))
    }

    /// Put a truncated last message back into `streaming` for continuation
    pub fn resume_last(&mut self) -> Result<Message> {
        if self.is_busy() {
            return Err(Error::Busy);
        }

        let last = self
            .messages
            .pop()
            .ok_or_else(|| Error::invalid_state("conversation is empty"))?;
        match Assembler::resume(last) {
            Ok(assembler) => {
                let resumed = assembler.into_message();
                self.messages.push(resumed.clone());
                Ok(resumed)
            }
            Err(last) => {
                let status = last.status;
                self.messages.push(last);
                Err(Error::invalid_state(format!(
                    "last message is {:?}, only truncated messages can be continued",
                    status
                )))
            }
        }
    }

    /// Remove every message and restart sequence numbering
    pub fn clear(&mut self) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        self.messages.clear();
        self.next_index = 0;
        Ok(())
    }

    pub fn snapshot(&self) -> Conversation {
        Conversation {
            messages: self.messages.clone(),
        }
    }
}
