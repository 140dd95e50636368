//! Live sessions of one server instance.

use std::sync::Arc;

use dashmap::DashMap;

use crate::protocol::SessionId;
use crate::server::session::Session;

/// Thread-safe session table. Each [`BridgeServer`](crate::server::BridgeServer)
/// owns its own.
#[derive(Default)]
pub struct SessionRegistry {
    inner: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, session: Arc<Session>) {
        self.inner.insert(session.id(), session);
    }

    pub(crate) fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.remove(id).map(|(_, session)| session)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every session.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.inner.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Snapshot of sessions that completed the handshake.
    pub fn connected(&self) -> Vec<Arc<Session>> {
        self.inner
            .iter()
            .filter(|entry| entry.value().is_connected())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.inner.len())
            .finish()
    }
}
