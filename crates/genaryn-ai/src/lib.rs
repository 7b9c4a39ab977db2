//! genaryn-ai: Streaming chat completion client
//!
//! Opens OpenAI-compatible streaming requests, turns the raw response bytes
//! into [`StreamEvent`]s and folds those events into transcript messages.

pub mod decoder;
pub mod error;
pub mod providers;
pub mod stream;
pub mod transport;
pub mod types;

pub use decoder::{DecodeStats, DecodedStream, EventDecoder, decode};
pub use error::{Error, Result};
pub use providers::ChatTransport;
pub use stream::{Assembler, StreamError, StreamEvent, StreamEventStream};
pub use transport::{PendingRequest, Termination, TransportEvent};
pub use types::*;
