//! Core types for chat transcripts and completion requests

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Wire name of this role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Lifecycle state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Finished; never changes again
    Complete,
    /// Currently receiving deltas
    Streaming,
    /// Stopped early with partial content; eligible for continuation
    Truncated,
    /// Stopped before any content arrived; eligible for retry
    Failed,
}

impl MessageStatus {
    /// Whether the message can still change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Streaming)
    }
}

/// Reason the server gave for ending generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of response
    Stop,
    /// Output token limit reached
    Length,
}

impl FinishReason {
    /// Parse the `finish_reason` string of a completion chunk.
    ///
    /// Unknown reasons (e.g. `content_filter`) count as a natural stop.
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "length" | "max_tokens" => FinishReason::Length,
            _ => FinishReason::Stop,
        }
    }
}

/// Token usage reported by the endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// A single transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    /// Position in the conversation, assigned on append
    pub sequence_index: u64,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
    /// What ended the message early, for truncated and failed messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    fn new(role: Role, content: String, status: MessageStatus) -> Self {
        Self {
            role,
            content,
            status,
            sequence_index: 0,
            timestamp: chrono::Utc::now().timestamp_millis(),
            error: None,
        }
    }

    /// Create a complete user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text.into(), MessageStatus::Complete)
    }

    /// Create a complete system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text.into(), MessageStatus::Complete)
    }

    /// Create a complete assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text.into(), MessageStatus::Complete)
    }

    /// Create an empty assistant message in `streaming` state
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new(), MessageStatus::Streaming)
    }

    /// Set the sequence index
    pub fn with_sequence_index(mut self, index: u64) -> Self {
        self.sequence_index = index;
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    /// Wire representation for a request history
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

/// Endpoint settings handed to the transport at construction time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Full URL of the chat completions route
    pub url: String,
    /// Model identifier sent with every request
    pub model: String,
    /// Bearer credential; requests go out unauthenticated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Additional headers for every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            api_key: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// One entry of the `messages` array in a request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Optional sampling parameters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamOptions {
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

/// Body of a streaming chat completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Build a streaming request for `model` over `messages`
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, options: StreamOptions) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }

    /// The last user turn in the history, if any
    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}
