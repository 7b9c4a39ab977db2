//! Incremental decoder for chat completion event streams
//!
//! Input is newline-delimited frames. A frame is one of:
//! - `data: {json}` or a bare `{json}` line carrying a completion chunk
//! - `data: [DONE]`, the terminal sentinel
//! - a blank keep-alive line, an SSE comment (`: ping`), or another SSE
//!   field (`event:`, `id:`, `retry:`), all ignored
//!
//! Bytes are buffered until a full line is available, so frames and UTF-8
//! sequences may be split across chunks at any position.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;

use crate::stream::{StreamError, StreamEvent, StreamEventStream};
use crate::transport::{PendingRequest, Termination, TransportEvent};
use crate::types::{FinishReason, Usage};

const SENTINEL: &str = "[DONE]";

/// Counters gathered while decoding one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Malformed frames that were skipped
    pub decode_errors: usize,
    /// Finish reason reported by the server, if any
    pub finish_reason: Option<FinishReason>,
    /// Usage reported in the final chunk, if any
    pub usage: Option<Usage>,
}

/// Parses raw chunks into [`StreamEvent`]s.
///
/// One decoder per stream. After the first terminal event every further
/// input is ignored.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    finished: bool,
    stats: DecodeStats,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk, returning every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let scan_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut line_start = 0;
        let mut search_from = scan_from;
        while let Some(offset) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let line_end = search_from + offset;
            let line = self.buffer[line_start..line_end].to_vec();
            line_start = line_end + 1;
            search_from = line_start;

            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
            if self.finished {
                self.buffer.clear();
                return events;
            }
        }

        self.buffer.drain(..line_start);
        events
    }

    /// Signal a clean end of input.
    ///
    /// A trailing line without a newline is decoded as a final frame. If no
    /// terminal event was produced by then, the stream ended early.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            if let Some(event) = self.decode_line(&rest) {
                events.push(event);
            }
        }

        if !self.finished {
            self.finished = true;
            events.push(StreamEvent::error(StreamError::UnexpectedEnd));
        }
        events
    }

    /// Terminate with an error. Buffered partial frames are discarded.
    pub fn fail(&mut self, error: StreamError) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.buffer.clear();
        Some(StreamEvent::error(error))
    }

    /// Whether a terminal event has been produced
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => return self.malformed(false, format!("invalid UTF-8 in frame: {}", e)),
        };

        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let payload = if let Some(data) = line.strip_prefix("data:") {
            data.trim_start()
        } else if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:")
        {
            return None;
        } else {
            line
        };

        if payload.is_empty() {
            return None;
        }

        if payload == SENTINEL {
            self.finished = true;
            return Some(StreamEvent::Done {
                reason: self.stats.finish_reason.unwrap_or(FinishReason::Stop),
            });
        }

        let looks_like_sentinel = payload.starts_with('[');
        match serde_json::from_str::<CompletionChunk>(payload) {
            Ok(chunk) => self.decode_chunk(chunk),
            Err(e) => self.malformed(looks_like_sentinel, format!("{}: {}", e, payload)),
        }
    }

    fn decode_chunk(&mut self, chunk: CompletionChunk) -> Option<StreamEvent> {
        if let Some(error) = chunk.error.filter(|e| !e.is_null()) {
            self.finished = true;
            return Some(StreamEvent::error(StreamError::Api(error_message(&error))));
        }

        if let Some(usage) = chunk.usage {
            self.stats.usage = Some(usage);
        }

        let choice = chunk.choices.into_iter().next()?;
        if let Some(ref reason) = choice.finish_reason {
            self.stats.finish_reason = Some(FinishReason::from_wire(reason));
        }

        choice
            .delta
            .and_then(|delta| delta.content)
            .filter(|text| !text.is_empty())
            .map(|text| StreamEvent::Delta { text })
    }

    /// Skip a frame that could not be parsed.
    ///
    /// Once the server reported a finish reason the next frame must be the
    /// sentinel, so a malformed frame there ends the stream instead.
    fn malformed(&mut self, looks_like_sentinel: bool, detail: String) -> Option<StreamEvent> {
        if looks_like_sentinel || self.stats.finish_reason.is_some() {
            self.finished = true;
            tracing::warn!("Unparseable terminal frame: {}", detail);
            return Some(StreamEvent::error(StreamError::DecodeFailure(detail)));
        }

        self.stats.decode_errors += 1;
        tracing::warn!(
            decode_errors = self.stats.decode_errors,
            "Skipping malformed frame: {}",
            detail
        );
        None
    }
}

/// Human-readable text of an `error` member.
///
/// Accepts a bare string or an object with optional `message` and `type`;
/// anything else is rendered as JSON.
fn error_message(error: &Value) -> String {
    if let Some(text) = error.as_str() {
        return text.to_string();
    }

    let message = error.get("message").and_then(Value::as_str);
    let error_type = error.get("type").and_then(Value::as_str);
    match (message, error_type) {
        (Some(message), Some(error_type)) => format!("{} ({})", message, error_type),
        (Some(message), None) => message.to_string(),
        _ => error.to_string(),
    }
}

/// Decoded view over a [`PendingRequest`].
///
/// Stats stay readable after the stream is consumed.
pub struct DecodedStream {
    pub events: StreamEventStream,
    stats: Arc<Mutex<DecodeStats>>,
}

impl DecodedStream {
    pub fn stats(&self) -> DecodeStats {
        *self.stats.lock()
    }
}

/// Decode a pending request into a finite event stream ending in exactly one
/// terminal event. Transport input after the sentinel is never read.
pub fn decode(mut pending: PendingRequest) -> DecodedStream {
    let stats = Arc::new(Mutex::new(DecodeStats::default()));
    let shared = Arc::clone(&stats);

    let events = stream! {
        let mut decoder = EventDecoder::new();

        while let Some(item) = pending.next().await {
            let events = match item {
                TransportEvent::Chunk(bytes) => decoder.push(&bytes),
                TransportEvent::End(Termination::NaturalEnd) => decoder.finish(),
                TransportEvent::End(Termination::NetworkError(e)) => {
                    tracing::warn!("Stream network error: {}", e);
                    decoder.fail(StreamError::Network(e.to_string())).into_iter().collect()
                }
                TransportEvent::End(Termination::Cancelled) => {
                    tracing::debug!("Stream cancelled");
                    decoder.fail(StreamError::Cancelled).into_iter().collect()
                }
            };

            *shared.lock() = decoder.stats();
            for event in events {
                yield event;
            }

            if decoder.is_finished() {
                break;
            }
        }

        if !decoder.is_finished() {
            if let Some(event) = decoder.fail(StreamError::UnexpectedEnd) {
                yield event;
            }
        }
    };

    DecodedStream {
        events: Box::pin(events),
        stats,
    }
}

// Wire types

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}
