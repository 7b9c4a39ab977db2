//! Chat session: drives streams into the conversation store

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use genaryn_ai::{
    Assembler, ChatMessage, ChatRequest, ChatTransport, FinishReason, Message, MessageStatus, Role,
    StreamError, StreamEvent, StreamOptions, Usage, decode,
};
use tokio::sync::broadcast;

use crate::{
    continuation::{DEFAULT_CONTINUE_INSTRUCTION, continuation_history},
    conversation::Conversation,
    error::{Error, Result},
    events::{ConversationUpdate, Transition},
    export::TranscriptExporter,
    handle::SessionHandle,
    store::{ConversationStore, ListenerId},
};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sent as the first message of every request; never stored in the transcript
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// User turn appended when continuing a truncated message
    pub continue_instruction: String,
    /// Cancel streams still running after this long
    pub stream_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            continue_instruction: DEFAULT_CONTINUE_INSTRUCTION.to_string(),
            stream_timeout: None,
        }
    }
}

/// Result of one streamed turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The assistant message as it ended
    pub message: Message,
    /// Finish reason reported by the endpoint
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    /// Malformed frames skipped while decoding
    pub decode_errors: usize,
}

impl TurnOutcome {
    pub fn status(&self) -> MessageStatus {
        self.message.status
    }
}

/// One conversation with one endpoint.
///
/// Methods take `&self`; share the session behind an `Arc` to drive it from
/// several tasks. At most one stream is outstanding at a time and overlapping
/// submissions are rejected with [`Error::Busy`].
pub struct ChatSession {
    config: SessionConfig,
    transport: Arc<dyn ChatTransport>,
    store: ConversationStore,
    handle: SessionHandle,
}

impl ChatSession {
    pub fn new(config: SessionConfig, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            config,
            transport,
            store: ConversationStore::new(),
            handle: SessionHandle::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Set the system prompt
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.config.system_prompt = Some(prompt.into());
    }

    /// The observable store behind this session
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Get a cloneable handle for cancelling from external code
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn snapshot(&self) -> Conversation {
        self.store.snapshot()
    }

    pub fn is_busy(&self) -> bool {
        self.store.is_busy()
    }

    /// Register a listener called with a snapshot after every transition
    pub fn subscribe(
        &self,
        listener: impl Fn(&ConversationUpdate) + Send + Sync + 'static,
    ) -> ListenerId {
        self.store.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Subscribe to updates over a broadcast channel
    pub fn updates(&self) -> broadcast::Receiver<ConversationUpdate> {
        self.store.updates()
    }

    /// Cancel the outstanding stream, if any.
    ///
    /// The streaming message ends as truncated, or failed if it has no
    /// content yet.
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// Empty the transcript
    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    /// Hand the finalized transcript to `exporter`
    pub fn export_to(&self, exporter: &dyn TranscriptExporter) -> Result<()> {
        let conversation = self.store.snapshot();
        if conversation.is_busy() {
            return Err(Error::Busy);
        }
        tracing::debug!(
            exporter = exporter.name(),
            messages = conversation.len(),
            "Exporting transcript"
        );
        exporter.export(&conversation)
    }

    /// Append a user turn and stream the assistant's reply
    pub async fn submit(&self, text: &str) -> Result<TurnOutcome> {
        if text.trim().is_empty() {
            return Err(Error::invalid_state("message is empty"));
        }

        let (history, placeholder, id) = self.store.transact(|tx| {
            tx.append(Message::user(text))?;
            let placeholder = tx.append(Message::assistant_placeholder())?;
            Ok((tx.state().snapshot().history(), placeholder, self.handle.begin()))
        })?;

        tracing::info!(sequence = placeholder.sequence_index, "Submitting user turn");
        self.stream_turn(id, history, Assembler::from_streaming(placeholder))
            .await
    }

    /// Resume a truncated last message, appending to its content
    pub async fn continue_last(&self) -> Result<TurnOutcome> {
        let (history, resumed, id) = self.store.transact(|tx| {
            let history =
                continuation_history(&tx.state().snapshot(), &self.config.continue_instruction)?;
            let resumed = tx.resume_last()?;
            Ok((history, resumed, self.handle.begin()))
        })?;

        tracing::info!(
            sequence = resumed.sequence_index,
            chars = resumed.content.len(),
            "Continuing truncated message"
        );
        self.stream_turn(id, history, Assembler::from_streaming(resumed))
            .await
    }

    /// Stream a fresh reply to the user turn whose reply failed.
    ///
    /// The failed message stays in the transcript; the request is the one
    /// originally sent.
    pub async fn retry_last(&self) -> Result<TurnOutcome> {
        let (history, placeholder, id) = self.store.transact(|tx| {
            let snapshot = tx.state().snapshot();
            match snapshot.last() {
                Some(last) if last.status == MessageStatus::Failed => {}
                Some(last) if last.is_streaming() => return Err(Error::Busy),
                _ => return Err(Error::invalid_state("only failed messages can be retried")),
            }

            let history = snapshot.history();
            if history.last().map(|m| m.role) != Some(Role::User) {
                return Err(Error::invalid_state("no user turn to retry"));
            }
            let placeholder = tx.append(Message::assistant_placeholder())?;
            Ok((history, placeholder, self.handle.begin()))
        })?;

        tracing::info!(sequence = placeholder.sequence_index, "Retrying failed turn");
        self.stream_turn(id, history, Assembler::from_streaming(placeholder))
            .await
    }

    fn build_request(&self, history: Vec<ChatMessage>) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(ref prompt) = self.config.system_prompt {
            messages.push(ChatMessage::new(Role::System, prompt.clone()));
        }
        messages.extend(history);

        ChatRequest::new(
            self.transport.model(),
            messages,
            StreamOptions {
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            },
        )
    }

    /// Stream into the message that stream `id` was registered for.
    ///
    /// `id` comes from `SessionHandle::begin`, called in the same transaction
    /// that made the message streaming, so a cancel never finds a streaming
    /// message without an outstanding stream.
    async fn stream_turn(
        &self,
        id: u64,
        history: Vec<ChatMessage>,
        assembler: Assembler,
    ) -> Result<TurnOutcome> {
        let request = self.build_request(history);
        let mut guard = StreamGuard {
            store: &self.store,
            handle: &self.handle,
            id,
            assembler,
            watchdog: self
                .config
                .stream_timeout
                .and_then(|timeout| self.handle.cancel_after(timeout)),
        };

        let pending = match self.transport.open(&request).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!("Failed to open stream: {}", e);
                guard.apply(&StreamEvent::error(StreamError::Network(e.to_string())))?;
                return Err(e.into());
            }
        };
        self.handle.attach(id, pending.cancel_token());

        let mut decoded = decode(pending);
        while let Some(event) = decoded.events.next().await {
            guard.apply(&event)?;
            if event.is_terminal() {
                break;
            }
        }
        if !guard.assembler.is_finished() {
            guard.apply(&StreamEvent::error(StreamError::UnexpectedEnd))?;
        }

        let stats = decoded.stats();
        let message = guard.assembler.message().clone();
        tracing::info!(
            sequence = message.sequence_index,
            status = ?message.status,
            chars = message.content.len(),
            decode_errors = stats.decode_errors,
            "Turn finished"
        );

        Ok(TurnOutcome {
            message,
            finish_reason: stats.finish_reason,
            usage: stats.usage,
            decode_errors: stats.decode_errors,
        })
    }
}

/// Owns the assembler for one stream.
///
/// If the turn future is dropped mid-stream the message is finalized as if
/// cancelled, so the store never keeps a dangling streaming message.
struct StreamGuard<'a> {
    store: &'a ConversationStore,
    handle: &'a SessionHandle,
    id: u64,
    assembler: Assembler,
    watchdog: Option<tokio::task::JoinHandle<()>>,
}

impl StreamGuard<'_> {
    fn apply(&mut self, event: &StreamEvent) -> Result<Transition> {
        let message = self.assembler.process_event(event);
        let transition = self.store.update_streaming(message)?;
        if transition.is_terminal() {
            tracing::debug!(stream = self.id, ?transition, "Stream ended");
        }
        Ok(transition)
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        self.handle.finish(self.id);

        if !self.assembler.is_finished() {
            tracing::debug!(stream = self.id, "Stream abandoned, finalizing message");
            let message = self
                .assembler
                .process_event(&StreamEvent::error(StreamError::Cancelled));
            let _ = self.store.update_streaming(message);
        }
    }
}
