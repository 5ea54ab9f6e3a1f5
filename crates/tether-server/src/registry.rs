//! Process-wide table of connected sessions.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tether_core::{ClientId, Session};
use tracing::{debug, info};

use crate::errors::ServerError;

/// Live sessions keyed by client id.
///
/// Register and unregister are atomic per entry. Once
/// [`broadcast_shutdown`](Self::broadcast_shutdown) starts, registration is
/// refused.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ClientId, Session>,
    closing: AtomicBool,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session.
    ///
    /// Fails if a session with the same id is live or shutdown has started.
    pub fn register(&self, session: Session) -> Result<(), ServerError> {
        if self.is_closing() {
            return Err(ServerError::ShuttingDown);
        }
        let id = session.id().clone();
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => return Err(ServerError::DuplicateSession(id)),
            Entry::Vacant(slot) => {
                let _ = slot.insert(session.clone());
            }
        }
        // shutdown may have snapshotted before our insert
        if self.is_closing() {
            let _ = self.unregister(&session);
            return Err(ServerError::ShuttingDown);
        }
        debug!(client_id = %id, total = self.len(), "session registered");
        Ok(())
    }

    /// Remove `session` if it is the registered instance for its id.
    pub fn unregister(&self, session: &Session) -> bool {
        let removed = self
            .sessions
            .remove_if(session.id(), |_, registered| registered.ptr_eq(session))
            .is_some();
        if removed {
            debug!(client_id = %session.id(), total = self.len(), "session unregistered");
        }
        removed
    }

    /// Refuse new sessions and close every registered one.
    ///
    /// Returns the sessions that were closed so callers can wait on them.
    pub fn broadcast_shutdown(&self) -> Vec<Session> {
        self.closing.store(true, Ordering::SeqCst);
        let snapshot = self.snapshot();
        info!(count = snapshot.len(), "closing all sessions");
        for session in &snapshot {
            session.close();
        }
        snapshot
    }

    /// Registered session for `id`.
    pub fn get(&self, id: &ClientId) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Whether a session with `id` is registered.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Copy of every registered session.
    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether shutdown has started.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}
