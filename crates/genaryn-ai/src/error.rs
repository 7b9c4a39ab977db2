//! Error types for genaryn-ai

use thiserror::Error;

/// Result type alias using genaryn-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while talking to a chat completion endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint answered with a non-success status
    #[error("API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    /// Connection-level failure that did not come from reqwest
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid or missing credential
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_display() {
        let e = Error::api(404, "no such route");
        assert_eq!(e.to_string(), "API error: no such route (status: 404)");
    }

    #[test]
    fn test_json_conversion() {
        let e: Error = serde_json::from_str::<serde_json::Value>("{broken")
            .unwrap_err()
            .into();
        assert!(matches!(e, Error::Json(_)));
    }
}
