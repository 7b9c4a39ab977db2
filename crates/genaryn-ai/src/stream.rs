//! Stream events and the assembler that folds them into a message

use crate::types::{FinishReason, Message, MessageStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tokio_stream::Stream;

/// Why a stream ended without its terminal sentinel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StreamError {
    /// Transport failed (refused, reset, timeout, bad status)
    Network(String),
    /// The frame expected to carry the terminal sentinel could not be parsed
    DecodeFailure(String),
    /// The endpoint sent an error frame
    Api(String),
    /// Caller cancelled the request
    Cancelled,
    /// The connection closed cleanly but no sentinel was seen
    UnexpectedEnd,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Network(cause) => write!(f, "network error: {}", cause),
            StreamError::DecodeFailure(cause) => write!(f, "decode failure: {}", cause),
            StreamError::Api(message) => write!(f, "endpoint error: {}", message),
            StreamError::Cancelled => write!(f, "cancelled"),
            StreamError::UnexpectedEnd => write!(f, "stream ended before completion"),
        }
    }
}

/// A decoded unit of a completion stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental text
    Delta { text: String },
    /// Terminal sentinel reached
    Done { reason: FinishReason },
    /// Stream failed before the sentinel
    Error { error: StreamError },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    pub fn done() -> Self {
        Self::Done {
            reason: FinishReason::Stop,
        }
    }

    pub fn error(error: StreamError) -> Self {
        Self::Error { error }
    }

    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// A stream of decoded events
pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Fold one event into a message.
///
/// Events arriving after the message reached a terminal status are ignored.
pub fn apply(mut message: Message, event: &StreamEvent) -> Message {
    if message.status.is_terminal() {
        return message;
    }

    match event {
        StreamEvent::Delta { text } => {
            message.content.push_str(text);
        }
        StreamEvent::Done { reason } => match reason {
            FinishReason::Stop => {
                message.status = MessageStatus::Complete;
                message.error = None;
            }
            FinishReason::Length => {
                message.error = Some("output token limit reached".to_string());
                message.status = if message.content.is_empty() {
                    MessageStatus::Failed
                } else {
                    MessageStatus::Truncated
                };
            }
        },
        StreamEvent::Error { error } => {
            message.error = Some(error.to_string());
            message.status = if message.content.is_empty() {
                MessageStatus::Failed
            } else {
                MessageStatus::Truncated
            };
        }
    }

    message
}

/// Builds one assistant message out of stream events.
///
/// Created either fresh for a new turn or in append mode over a truncated
/// message, in which case deltas extend the existing content.
#[derive(Debug, Clone)]
pub struct Assembler {
    message: Message,
}

impl Assembler {
    /// Start a new assistant message
    pub fn start(sequence_index: u64) -> Self {
        Self {
            message: Message::assistant_placeholder().with_sequence_index(sequence_index),
        }
    }

    /// Continue from an already-streaming message
    pub fn from_streaming(message: Message) -> Self {
        Self { message }
    }

    /// Re-open a truncated message in append mode.
    ///
    /// Hands the message back unchanged if it is not truncated.
    pub fn resume(mut message: Message) -> std::result::Result<Self, Message> {
        if message.status != MessageStatus::Truncated {
            return Err(message);
        }
        message.status = MessageStatus::Streaming;
        message.error = None;
        Ok(Self { message })
    }

    /// Process a streaming event and return the updated message
    pub fn process_event(&mut self, event: &StreamEvent) -> &Message {
        let current = std::mem::replace(&mut self.message, Message::assistant_placeholder());
        self.message = apply(current, event);
        &self.message
    }

    /// Current state of the message
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Whether a terminal status was reached
    pub fn is_finished(&self) -> bool {
        self.message.status.is_terminal()
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fold(events: &[StreamEvent]) -> Message {
        let mut assembler = Assembler::start(1);
        for event in events {
            assembler.process_event(event);
        }
        assembler.into_message()
    }

    #[test]
    fn test_deltas_then_done_completes() {
        let msg = fold(&[
            StreamEvent::delta("Sitrep: "),
            StreamEvent::delta("all quiet."),
            StreamEvent::done(),
        ]);
        assert_eq!(msg.content, "Sitrep: all quiet.");
        assert_eq!(msg.status, MessageStatus::Complete);
        assert_eq!(msg.sequence_index, 1);
        assert!(msg.error.is_none());
    }

    #[test]
    fn test_deltas_keep_streaming() {
        let msg = fold(&[StreamEvent::delta("partial")]);
        assert_eq!(msg.status, MessageStatus::Streaming);
    }

    #[test]
    fn test_error_with_content_truncates() {
        let msg = fold(&[
            StreamEvent::delta("Recommend COA "),
            StreamEvent::error(StreamError::Network("connection reset".into())),
        ]);
        assert_eq!(msg.status, MessageStatus::Truncated);
        assert_eq!(msg.content, "Recommend COA ");
        assert_eq!(msg.error.as_deref(), Some("network error: connection reset"));
    }

    #[test]
    fn test_error_without_content_fails() {
        let msg = fold(&[StreamEvent::error(StreamError::Network("refused".into()))]);
        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.content, "");
    }

    #[test]
    fn test_length_finish_truncates() {
        let msg = fold(&[
            StreamEvent::delta("long answer"),
            StreamEvent::Done {
                reason: FinishReason::Length,
            },
        ]);
        assert_eq!(msg.status, MessageStatus::Truncated);
    }

    #[test]
    fn test_events_after_done_ignored() {
        let msg = fold(&[
            StreamEvent::delta("a"),
            StreamEvent::done(),
            StreamEvent::delta("b"),
            StreamEvent::error(StreamError::Cancelled),
            StreamEvent::done(),
        ]);
        assert_eq!(msg.content, "a");
        assert_eq!(msg.status, MessageStatus::Complete);
        assert!(msg.error.is_none());
    }

    #[test]
    fn test_resume_appends_to_truncated() {
        let truncated = fold(&[
            StreamEvent::delta("Recommend COA "),
            StreamEvent::error(StreamError::UnexpectedEnd),
        ]);
        let mut assembler = Assembler::resume(truncated).unwrap();
        assert!(assembler.message().is_streaming());
        assembler.process_event(&StreamEvent::delta("2 due to lower risk."));
        assembler.process_event(&StreamEvent::done());
        let msg = assembler.into_message();
        assert_eq!(msg.content, "Recommend COA 2 due to lower risk.");
        assert_eq!(msg.status, MessageStatus::Complete);
        assert!(msg.error.is_none());
    }

    #[test]
    fn test_resume_rejects_complete_message() {
        let complete = fold(&[StreamEvent::delta("x"), StreamEvent::done()]);
        let back = Assembler::resume(complete.clone()).unwrap_err();
        assert_eq!(back, complete);
    }

    #[test]
    fn test_resume_error_keeps_prior_content() {
        let truncated = fold(&[
            StreamEvent::delta("first half"),
            StreamEvent::error(StreamError::Cancelled),
        ]);
        let mut assembler = Assembler::resume(truncated).unwrap();
        assembler.process_event(&StreamEvent::error(StreamError::Network("reset".into())));
        let msg = assembler.into_message();
        assert_eq!(msg.status, MessageStatus::Truncated);
        assert_eq!(msg.content, "first half");
    }

    proptest! {
        #[test]
        fn prop_final_content_is_concatenation(deltas in proptest::collection::vec(".{0,12}", 0..20)) {
            let mut events: Vec<StreamEvent> = deltas.iter().map(StreamEvent::delta).collect();
            events.push(StreamEvent::done());
            let msg = fold(&events);
            prop_assert_eq!(msg.content, deltas.concat());
            prop_assert_eq!(msg.status, MessageStatus::Complete);
        }

        #[test]
        fn prop_continuation_is_transparent(
            before in proptest::collection::vec("[a-zA-Z ]{1,8}", 1..10),
            after in proptest::collection::vec("[a-zA-Z ]{0,8}", 0..10),
        ) {
            let mut first: Vec<StreamEvent> = before.iter().map(StreamEvent::delta).collect();
            first.push(StreamEvent::error(StreamError::UnexpectedEnd));
            let truncated = fold(&first);

            let mut assembler = Assembler::resume(truncated).unwrap();
            for text in &after {
                assembler.process_event(&StreamEvent::delta(text));
            }
            assembler.process_event(&StreamEvent::done());
            let spliced = assembler.into_message();

            let mut uninterrupted: Vec<StreamEvent> =
                before.iter().chain(after.iter()).map(StreamEvent::delta).collect();
            uninterrupted.push(StreamEvent::done());
            let single = fold(&uninterrupted);

            prop_assert_eq!(spliced.content, single.content);
            prop_assert_eq!(spliced.status, single.status);
        }
    }
}
