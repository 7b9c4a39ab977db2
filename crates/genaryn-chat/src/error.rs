//! Error types for genaryn-chat

use thiserror::Error;

/// Result type alias using genaryn-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned to callers of the conversation engine.
///
/// Stream failures never show up here; they end the assistant message as
/// truncated or failed instead.
#[derive(Error, Debug)]
pub enum Error {
    /// A message is still streaming
    #[error("Conversation is busy: a response is still streaming")]
    Busy,

    /// The operation does not apply to the current transcript
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Export collaborator failed
    #[error("Export failed: {0}")]
    Export(String),

    /// An error from the transport layer
    #[error(transparent)]
    Ai(#[from] genaryn_ai::Error),
}

impl Error {
    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }

    /// Check if this error is API misuse rather than a runtime failure
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::Busy | Error::InvalidState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_invalid_state() {
        assert!(Error::Busy.is_invalid_state());
        assert!(Error::invalid_state("nothing to continue").is_invalid_state());
    }

    #[test]
    fn test_transport_error_is_not_invalid_state() {
        let e = Error::from(genaryn_ai::Error::InvalidApiKey);
        assert!(!e.is_invalid_state());
        assert_eq!(e.to_string(), "Invalid or missing API key");
    }
}
