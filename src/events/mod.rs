//! Typed publish/subscribe for lifecycle events.
//!
//! # Responsibilities
//! - Keep a listener registry keyed by event kind
//! - Invoke listeners synchronously on emit, outside the registry lock
//! - Offer an async stream of every event for consumers that prefer awaiting
//!
//! # Design Decisions
//! - One bus per server or client instance, never a process-wide singleton
//! - Listeners may register or remove listeners from inside a callback
//! - A lagging stream subscriber loses events; listeners never do

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

/// An event that can be published on an [`EventBus`].
pub trait Event: Clone + Send + Sync + 'static {
    /// Name of the event, used as the registry key.
    type Kind: Copy + Eq + Hash + Send + Sync + std::fmt::Debug + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Handle returned by [`EventBus::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E> {
    id: ListenerId,
    once: bool,
    listener: Listener<E>,
}

pub struct EventBus<E: Event> {
    listeners: RwLock<HashMap<E::Kind, Vec<Entry<E>>>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<E>,
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        let (stream, _) = broadcast::channel(256);
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stream,
        }
    }

    /// Register a listener for one event kind.
    pub fn on<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(kind, false, Arc::new(listener))
    }

    /// Register a listener that is removed after its first call.
    pub fn once<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(kind, true, Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for entries in listeners.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove every listener for a kind.
    pub fn remove_all(&self, kind: E::Kind) {
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.remove(&kind);
    }

    /// Number of listeners registered for a kind.
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        let listeners = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Stream of every emitted event.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.stream.subscribe()
    }

    /// Publish an event to listeners and stream subscribers.
    pub fn emit(&self, event: E) {
        let kind = event.kind();
        let snapshot: Vec<Listener<E>> = {
            let mut listeners = match self.listeners.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match listeners.get_mut(&kind) {
                Some(entries) => {
                    let snapshot = entries.iter().map(|e| e.listener.clone()).collect();
                    entries.retain(|e| !e.once);
                    snapshot
                }
                None => Vec::new(),
            }
        };

        for listener in snapshot {
            listener(&event);
        }

        // No subscribers is not an error.
        let _ = self.stream.send(event);
    }

    fn insert(&self, kind: E::Kind, once: bool, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners
            .entry(kind)
            .or_default()
            .push(Entry { id, once, listener });
        id
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.stream.receiver_count())
            .finish_non_exhaustive()
    }
}
