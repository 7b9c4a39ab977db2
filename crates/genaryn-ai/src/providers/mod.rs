//! Transports that open completion streams

pub mod openai;
pub mod scripted;

use crate::{ChatRequest, Error, PendingRequest, Result};
use async_trait::async_trait;

/// Opens streaming chat completion requests.
///
/// Implementations never retry and never interpret the response body; they
/// hand back raw chunks. Only request construction errors are returned from
/// `open`; everything after that ends the [`PendingRequest`].
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Model identifier requests should carry
    fn model(&self) -> &str;

    /// Start one request
    async fn open(&self, request: &ChatRequest) -> Result<PendingRequest>;
}

/// Get an API key from a provided value or an environment variable
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or(Error::InvalidApiKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provided_key_wins() {
        let key = get_api_key(Some("sk-test"), "GENARYN_TEST_UNSET_VAR").unwrap();
        assert_eq!(key, "sk-test");
    }

    #[test]
    fn test_missing_key() {
        let err = get_api_key(None, "GENARYN_TEST_DEFINITELY_UNSET_VAR").unwrap_err();
        assert!(matches!(err, Error::InvalidApiKey));
    }

    #[test]
    fn test_empty_provided_key_is_missing() {
        let err = get_api_key(Some(""), "GENARYN_TEST_DEFINITELY_UNSET_VAR").unwrap_err();
        assert!(matches!(err, Error::InvalidApiKey));
    }
}
