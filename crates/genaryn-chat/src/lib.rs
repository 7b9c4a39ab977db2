//! genaryn-chat: Streaming conversation engine
//!
//! Keeps an observable transcript, streams assistant replies into it and
//! handles cancellation, continuation of truncated replies and retries.

pub mod continuation;
pub mod conversation;
pub mod error;
pub mod events;
pub mod export;
pub mod handle;
pub mod session;
pub mod store;

pub use continuation::{DEFAULT_CONTINUE_INSTRUCTION, continuation_history};
pub use conversation::{Conversation, ConversationState};
pub use error::{Error, Result};
pub use events::{ConversationUpdate, Transition};
pub use export::TranscriptExporter;
pub use handle::SessionHandle;
pub use session::{ChatSession, SessionConfig, TurnOutcome};
pub use store::{ConversationStore, ListenerId, Transaction};
