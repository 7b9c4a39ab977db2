//! Observable wrapper around [`ConversationState`]

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::broadcast;

use genaryn_ai::Message;

use crate::{
    conversation::{Conversation, ConversationState},
    error::Result,
    events::{ConversationUpdate, Transition},
};

type Listener = Arc<dyn Fn(&ConversationUpdate) + Send + Sync>;

/// Identifies a listener registered with [`ConversationStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Mutations made inside one [`ConversationStore::transact`] call.
///
/// Every successful mutation records a snapshot for subscribers.
pub struct Transaction<'a> {
    state: &'a mut ConversationState,
    updates: Vec<ConversationUpdate>,
}

impl Transaction<'_> {
    pub fn state(&self) -> &ConversationState {
        self.state
    }

    pub fn append(&mut self, message: Message) -> Result<Message> {
        let appended = self.state.append(message)?.clone();
        self.record(Transition::Append);
        Ok(appended)
    }

    pub fn update_streaming(&mut self, partial: &Message) -> Result<Transition> {
        let transition = self.state.update_streaming(partial)?;
        self.record(transition);
        Ok(transition)
    }

    pub fn resume_last(&mut self) -> Result<Message> {
        let resumed = self.state.resume_last()?;
        self.record(Transition::Resume);
        Ok(resumed)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.state.clear()?;
        self.record(Transition::Clear);
        Ok(())
    }

    fn record(&mut self, transition: Transition) {
        self.updates.push(ConversationUpdate {
            transition,
            conversation: self.state.snapshot(),
        });
    }
}

struct StoreInner {
    state: Mutex<ConversationState>,
    /// Serializes notification so subscribers see transitions in order
    delivery: ReentrantMutex<()>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    updates: broadcast::Sender<ConversationUpdate>,
}

/// Conversation state shared between a session and its observers.
///
/// Listeners run synchronously after the state lock is released, so they
/// may read snapshots. Cloning is cheap.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<StoreInner>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(ConversationState::new()),
                delivery: ReentrantMutex::new(()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                updates,
            }),
        }
    }

    /// Run `f` against the state atomically, then notify subscribers of
    /// every mutation it made. Nothing is delivered when `f` fails, and a
    /// failing `f` must not have mutated.
    pub fn transact<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let _delivery = self.inner.delivery.lock();

        let (result, updates) = {
            let mut guard = self.inner.state.lock();
            let mut tx = Transaction {
                state: &mut *guard,
                updates: Vec::new(),
            };
            let result = f(&mut tx);
            (result, tx.updates)
        };

        if result.is_ok() {
            for update in &updates {
                self.notify(update);
            }
        }
        result
    }

    fn notify(&self, update: &ConversationUpdate) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(update);
        }
        let _ = self.inner.updates.send(update.clone());
    }

    pub fn append(&self, message: Message) -> Result<Message> {
        self.transact(|tx| tx.append(message))
    }

    pub fn update_streaming(&self, partial: &Message) -> Result<Transition> {
        self.transact(|tx| tx.update_streaming(partial))
    }

    pub fn resume_last(&self) -> Result<Message> {
        self.transact(|tx| tx.resume_last())
    }

    pub fn clear(&self) -> Result<()> {
        self.transact(|tx| tx.clear())
    }

    pub fn snapshot(&self) -> Conversation {
        self.inner.state.lock().snapshot()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().is_busy()
    }

    /// Register a listener called with a snapshot after every transition.
    ///
    /// Listeners run on the mutating task and should return quickly.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ConversationUpdate) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Receive updates over a channel instead of a callback.
    ///
    /// Slow receivers lag and skip updates; callbacks never do.
    pub fn updates(&self) -> broadcast::Receiver<ConversationUpdate> {
        self.inner.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use genaryn_ai::MessageStatus;

    fn record(store: &ConversationStore) -> Arc<Mutex<Vec<ConversationUpdate>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(move |u| sink.lock().push(u.clone()));
        seen
    }

    #[test]
    fn test_listener_sees_each_transition() {
        let store = ConversationStore::new();
        let seen = record(&store);

        store
            .transact(|tx| {
                tx.append(Message::user("status report"))?;
                tx.append(Message::assistant_placeholder())
            })
            .unwrap();
        let mut partial = Message::assistant_placeholder();
        partial.content = "Sitrep".into();
        partial.status = MessageStatus::Complete;
        store.update_streaming(&partial).unwrap();

        let seen = seen.lock();
        let transitions: Vec<_> = seen.iter().map(|u| u.transition).collect();
        assert_eq!(
            transitions,
            vec![Transition::Append, Transition::Append, Transition::Complete]
        );
        assert_eq!(seen[0].conversation.len(), 1);
        assert_eq!(seen[1].conversation.len(), 2);
        assert_eq!(seen[2].message().unwrap().content, "Sitrep");
    }

    #[test]
    fn test_failed_transaction_notifies_nothing() {
        let store = ConversationStore::new();
        store.append(Message::assistant_placeholder()).unwrap();
        let seen = record(&store);

        let err = store.append(Message::user("again")).unwrap_err();
        assert!(matches!(err, Error::Busy));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let store = ConversationStore::new();
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let id = store.subscribe(move |_| *sink.lock() += 1);

        store.append(Message::user("one")).unwrap();
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.append(Message::user("two")).unwrap();
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_listener_can_read_snapshot() {
        let store = ConversationStore::new();
        let observer = store.clone();
        let lens = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lens);
        store.subscribe(move |_| sink.lock().push(observer.snapshot().len()));

        store.append(Message::user("one")).unwrap();
        store.append(Message::user("two")).unwrap();
        assert_eq!(*lens.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_updates_channel() {
        let store = ConversationStore::new();
        let mut rx = store.updates();
        store.append(Message::user("one")).unwrap();
        store.clear().unwrap();

        assert_eq!(rx.recv().await.unwrap().transition, Transition::Append);
        let cleared = rx.recv().await.unwrap();
        assert_eq!(cleared.transition, Transition::Clear);
        assert!(cleared.conversation.is_empty());
    }
}
