//! Per-key session slots.
//!
//! Each session lives behind its own `Mutex`, so at most one state
//! transition is in flight per (user, thread) while distinct keys run fully
//! in parallel. The pipeline holds a slot's lock for the span of a turn.

use crabdesk_core::message::SessionKey;
use crabdesk_core::session::Session;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Concurrent map of active sessions.
pub struct SessionRegistry {
    slots: DashMap<SessionKey, Arc<Mutex<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// The slot for a key, if the session is active.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<Mutex<Session>>> {
        self.slots.get(key).map(|entry| entry.value().clone())
    }

    /// Insert a session, or return the existing slot if the key is already
    /// active — an in-flight session is never clobbered.
    pub fn insert(&self, session: Session) -> Arc<Mutex<Session>> {
        self.slots
            .entry(session.key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(session)))
            .value()
            .clone()
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn remove(&self, key: &SessionKey) {
        self.slots.remove(key);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
