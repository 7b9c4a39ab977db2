//! A cloneable handle for cancelling a session's stream from external code.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveStream {
    id: u64,
    cancelled: bool,
    request: Option<CancellationToken>,
}

/// A cloneable handle for cancelling the session's outstanding stream.
///
/// Holds at most one stream at a time. Cancelling when nothing is
/// outstanding is a no-op.
#[derive(Clone, Default)]
pub struct SessionHandle {
    active: Arc<Mutex<Option<ActiveStream>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a new outstanding stream, replacing any stale reference
    pub(crate) fn begin(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut active = self.active.lock();
        if let Some(stale) = active.take() {
            tracing::debug!(stream = stale.id, "Dropping stale stream reference");
        }
        *active = Some(ActiveStream {
            id,
            cancelled: false,
            request: None,
        });
        id
    }

    /// Bind the transport's cancel token to stream `id`.
    ///
    /// A cancel that arrived before the request was opened takes effect
    /// immediately.
    pub(crate) fn attach(&self, id: u64, request: CancellationToken) {
        let mut active = self.active.lock();
        match active.as_mut() {
            Some(stream) if stream.id == id => {
                if stream.cancelled {
                    request.cancel();
                }
                stream.request = Some(request);
            }
            _ => request.cancel(),
        }
    }

    /// Forget stream `id` once it has ended
    pub(crate) fn finish(&self, id: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|s| s.id == id) {
            *active = None;
        }
    }

    /// Cancel the outstanding stream. Returns whether one was outstanding.
    pub fn cancel(&self) -> bool {
        let mut active = self.active.lock();
        match active.as_mut() {
            Some(stream) => {
                Self::cancel_stream(stream);
                true
            }
            None => false,
        }
    }

    fn cancel_stream(stream: &mut ActiveStream) {
        stream.cancelled = true;
        if let Some(ref request) = stream.request {
            request.cancel();
        }
    }

    /// Whether a stream is outstanding
    pub fn is_streaming(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Cancel the current stream once `after` has elapsed, unless it ended
    /// first. A stream started later is left alone.
    ///
    /// Returns `None` when nothing is outstanding.
    pub fn cancel_after(&self, after: Duration) -> Option<tokio::task::JoinHandle<()>> {
        let id = self.active.lock().as_ref().map(|s| s.id)?;
        let active = Arc::clone(&self.active);

        Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let mut active = active.lock();
            if let Some(stream) = active.as_mut().filter(|s| s.id == id) {
                tracing::warn!(stream = id, "Stream exceeded {:?}, cancelling", after);
                Self::cancel_stream(stream);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_idle_is_noop() {
        let handle = SessionHandle::new();
        assert!(!handle.cancel());
        assert!(!handle.is_streaming());
    }

    #[test]
    fn test_cancel_before_attach() {
        let handle = SessionHandle::new();
        let id = handle.begin();
        assert!(handle.cancel());

        let token = CancellationToken::new();
        handle.attach(id, token.clone());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_attached() {
        let handle = SessionHandle::new();
        let id = handle.begin();
        let token = CancellationToken::new();
        handle.attach(id, token.clone());
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_finish_clears_only_matching() {
        let handle = SessionHandle::new();
        let first = handle.begin();
        let second = handle.begin();
        handle.finish(first);
        assert!(handle.is_streaming());
        handle.finish(second);
        assert!(!handle.is_streaming());
        assert!(!handle.cancel());
    }

    #[test]
    fn test_attach_stale_id_cancels_request() {
        let handle = SessionHandle::new();
        let stale = handle.begin();
        handle.begin();
        let token = CancellationToken::new();
        handle.attach(stale, token.clone());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_after_fires() {
        let handle = SessionHandle::new();
        let id = handle.begin();
        let token = CancellationToken::new();
        handle.attach(id, token.clone());

        let watchdog = handle.cancel_after(Duration::from_millis(10)).unwrap();
        watchdog.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_after_skips_newer_stream() {
        let handle = SessionHandle::new();
        let first = handle.begin();
        let watchdog = handle.cancel_after(Duration::from_millis(10)).unwrap();
        handle.finish(first);

        let second = handle.begin();
        let token = CancellationToken::new();
        handle.attach(second, token.clone());
        watchdog.await.unwrap();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_after_idle() {
        let handle = SessionHandle::new();
        assert!(handle.cancel_after(Duration::from_secs(1)).is_none());
    }
}
