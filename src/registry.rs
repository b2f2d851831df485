//! # Connection Registry
//!
//! Tracks the single live WebSocket session per user. Registering a new
//! session for a user returns the displaced handle so the caller can close
//! the old transport explicitly; nothing is closed implicitly here.
//!
//! The registry is generic over the session handle so the protocol layer can
//! be exercised in tests with a recording stub instead of a live actor
//! mailbox.

use crate::protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Outbound side of one live connection.
///
/// `deliver` is fire-and-forget: a handle whose peer is already gone simply
/// drops the message, which is what makes registry sends and broadcasts
/// best-effort per recipient.
pub trait SessionHandle: Clone + Send + Sync + 'static {
    fn deliver(&self, message: ServerMessage);
    fn close(&self);
}

/// At most one live connection handle per user id.
pub struct ConnectionRegistry<H: SessionHandle> {
    connections: Mutex<HashMap<String, (Uuid, H)>>,
}

impl<H: SessionHandle> ConnectionRegistry<H> {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Store a handle for a user, unconditionally replacing any existing
    /// entry. Returns the displaced handle; the caller owns closing it.
    pub fn register(&self, user_id: &str, connection_id: Uuid, handle: H) -> Option<H> {
        self.connections
            .lock()
            .unwrap()
            .insert(user_id.to_string(), (connection_id, handle))
            .map(|(_, displaced)| displaced)
    }

    /// Remove the user's entry if it still belongs to `connection_id`.
    ///
    /// Idempotent, and safe to call from a displaced session: a session that
    /// was already replaced must not evict its replacement. Returns whether
    /// an entry was actually removed; callers use this to decide whether the
    /// user's session state should be torn down too.
    pub fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        let mut connections = self.connections.lock().unwrap();
        if let Some((owner, _)) = connections.get(user_id) {
            if *owner == connection_id {
                connections.remove(user_id);
                return true;
            }
        }
        false
    }

    /// Deliver a message to one user. A no-op when the user has no
    /// registered connection, since the client may have already disconnected.
    pub fn send(&self, user_id: &str, message: ServerMessage) {
        if let Some((_, handle)) = self.connections.lock().unwrap().get(user_id) {
            handle.deliver(message);
        }
    }

    /// Deliver a message to every registered connection.
    pub fn broadcast(&self, message: ServerMessage) {
        for (_, handle) in self.connections.lock().unwrap().values() {
            handle.deliver(message.clone());
        }
    }

    /// Number of currently registered connections.
    pub fn connected_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

impl<H: SessionHandle> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
