//! In-memory transport that replays canned response bodies

use std::collections::VecDeque;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    error::{Error, Result},
    providers::ChatTransport,
    transport::PendingRequest,
    types::{ChatRequest, FinishReason, Usage},
};

#[derive(Debug, Clone)]
enum Step {
    Bytes(Bytes),
    Fail(String),
    Hang,
}

/// One canned response body, built frame by frame
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// A body that streams `deltas` and then the sentinel
    pub fn reply<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        deltas
            .into_iter()
            .fold(Self::new(), |script, d| script.delta(d.as_ref()))
            .done()
    }

    /// A request whose connection is refused before any byte arrives
    pub fn refused() -> Self {
        Self::new().drop_connection("connection refused")
    }

    /// Send a content delta frame
    pub fn delta(self, text: &str) -> Self {
        let frame = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": text}}]
        });
        self.frame(&frame.to_string())
    }

    /// Send a frame with a finish reason
    pub fn finish(self, reason: FinishReason) -> Self {
        let reason = match reason {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
        };
        let frame = serde_json::json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": reason}]
        });
        self.frame(&frame.to_string())
    }

    /// Send a usage-only frame
    pub fn usage(self, usage: Usage) -> Self {
        let frame = serde_json::json!({ "choices": [], "usage": usage });
        self.frame(&frame.to_string())
    }

    /// Send an endpoint error frame
    pub fn api_error(self, message: &str) -> Self {
        let frame = serde_json::json!({ "error": {"message": message, "type": "server_error"} });
        self.frame(&frame.to_string())
    }

    /// Send `data: <payload>` followed by a blank line
    pub fn frame(self, payload: &str) -> Self {
        self.raw(format!("data: {}\n\n", payload))
    }

    /// Send raw bytes as one chunk
    pub fn raw(mut self, bytes: impl Into<Bytes>) -> Self {
        self.steps.push(Step::Bytes(bytes.into()));
        self
    }

    /// Send the terminal sentinel
    pub fn done(self) -> Self {
        self.raw("data: [DONE]\n\n")
    }

    /// Fail the connection with `cause`
    pub fn drop_connection(mut self, cause: &str) -> Self {
        self.steps.push(Step::Fail(cause.to_string()));
        self
    }

    /// Stop sending without closing; only cancellation ends the request
    pub fn hang(mut self) -> Self {
        self.steps.push(Step::Hang);
        self
    }

    fn into_pending(self) -> PendingRequest {
        let chunks = stream! {
            for step in self.steps {
                match step {
                    Step::Bytes(bytes) => {
                        yield Ok(bytes);
                        tokio::task::yield_now().await;
                    }
                    Step::Fail(cause) => {
                        yield Err(Error::Connection(cause));
                        return;
                    }
                    Step::Hang => futures::future::pending::<()>().await,
                }
            }
        };
        PendingRequest::from_chunks(chunks)
    }
}

/// Transport answering each request with the next queued [`Script`].
///
/// Every request it receives is recorded. With nothing queued the request
/// fails as a refused connection.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    model: String,
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            model: "scripted".to_string(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Queue the response for a future request
    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Scripts not yet consumed
    pub fn remaining(&self) -> usize {
        self.scripts.lock().len()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    fn model(&self) -> &str {
        &self.model
    }

    async fn open(&self, request: &ChatRequest) -> Result<PendingRequest> {
        self.requests.lock().push(request.clone());
        let script = self.scripts.lock().pop_front().unwrap_or_else(Script::refused);
        Ok(script.into_pending())
    }
}
