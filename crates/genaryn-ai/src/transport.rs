//! In-flight request handle shared by every transport

use std::pin::Pin;
use std::task::{Context, Poll};

use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// How a chunk source ended
#[derive(Debug)]
pub enum Termination {
    /// The server closed the body normally
    NaturalEnd,
    /// Connection refused, reset, timed out, or answered with an error status
    NetworkError(Error),
    /// `cancel()` was called before the body ended
    Cancelled,
}

/// Item yielded by a [`PendingRequest`]
#[derive(Debug)]
pub enum TransportEvent {
    /// Raw bytes in arrival order
    Chunk(Bytes),
    /// Always the last item
    End(Termination),
}

/// A cancellable source of raw response chunks.
///
/// Yields chunks in arrival order followed by exactly one
/// [`TransportEvent::End`]. Dropping it closes the connection.
pub struct PendingRequest {
    cancel: CancellationToken,
    events: Pin<Box<dyn Stream<Item = TransportEvent> + Send>>,
}

impl PendingRequest {
    /// Wrap a fallible chunk stream.
    ///
    /// The first `Err` ends the request as a network error; exhaustion ends
    /// it naturally. Cancellation wins over any chunk not yet delivered.
    pub fn from_chunks<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let events = stream! {
            let mut chunks = Box::pin(chunks);
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => TransportEvent::End(Termination::Cancelled),
                    next = chunks.next() => match next {
                        Some(Ok(bytes)) => TransportEvent::Chunk(bytes),
                        Some(Err(e)) => TransportEvent::End(Termination::NetworkError(e)),
                        None => TransportEvent::End(Termination::NaturalEnd),
                    },
                };
                let last = matches!(event, TransportEvent::End(_));
                yield event;
                if last {
                    return;
                }
            }
        };

        Self {
            cancel,
            events: Box::pin(events),
        }
    }

    /// Stop the request. Safe to call any number of times, before or after
    /// the stream ended.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this request from elsewhere
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for PendingRequest {
    type Item = TransportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
