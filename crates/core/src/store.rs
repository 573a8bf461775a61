//! Store traits — the injected persistence seam.
//!
//! Two concerns, two traits: [`LongTermStore`] owns the durable per-user
//! record; [`SessionStore`] persists suspended sessions so a pending
//! escalation survives process restarts. Backends implement both; the
//! pipeline only ever sees the traits.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::SessionKey;
use crate::record::{InteractionEntry, LongTermRecord};
use crate::session::Session;

/// Durable key-value persistence of per-user interaction history.
///
/// Pure storage — no business logic. Implementations: file-backed JSON,
/// in-memory (for testing).
#[async_trait]
pub trait LongTermStore: Send + Sync {
    /// The backend name (e.g. "file", "memory").
    fn name(&self) -> &str;

    /// Load a user's record. `Ok(None)` means the user has no record yet.
    async fn load(&self, user_id: &str) -> Result<Option<LongTermRecord>, StoreError>;

    /// Persist a full record, replacing any previous version.
    async fn save(&self, record: &LongTermRecord) -> Result<(), StoreError>;

    /// Append one interaction and bump `last_updated` atomically: the
    /// history append and the timestamp land in a single write. Returns the
    /// updated record.
    async fn append_interaction(
        &self,
        user_id: &str,
        query: &str,
        resolution: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<LongTermRecord, StoreError>;

    /// The most recent `limit` interactions, most recent first.
    async fn recent(&self, user_id: &str, limit: usize)
    -> Result<Vec<InteractionEntry>, StoreError>;

    /// Interactions whose query or resolution contains `keyword`
    /// (case-insensitive), oldest first.
    async fn search(&self, user_id: &str, keyword: &str)
    -> Result<Vec<InteractionEntry>, StoreError>;

    /// Administrative deletion of a user's record. The pipeline never calls
    /// this. Returns whether a record existed.
    async fn purge(&self, user_id: &str) -> Result<bool, StoreError>;
}

/// Persistence for suspended sessions.
///
/// Only sessions awaiting human review need durability; resolved sessions
/// are removed again.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, key: &SessionKey) -> Result<Option<Session>, StoreError>;

    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Returns whether a persisted session existed.
    async fn remove_session(&self, key: &SessionKey) -> Result<bool, StoreError>;

    /// All persisted sessions currently awaiting review, oldest first.
    async fn list_suspended(&self) -> Result<Vec<Session>, StoreError>;
}
