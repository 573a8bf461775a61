//! In-memory backend — useful for testing and ephemeral deployments.

use async_trait::async_trait;
use crabdesk_core::error::StoreError;
use crabdesk_core::message::SessionKey;
use crabdesk_core::record::{InteractionEntry, LongTermRecord};
use crabdesk_core::session::{Session, SessionStatus};
use crabdesk_core::store::{LongTermStore, SessionStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An in-memory store backed by two maps. Nothing survives the process;
/// suspended sessions are "durable" only for the process lifetime.
pub struct InMemoryStore {
    records: Arc<RwLock<HashMap<String, LongTermRecord>>>,
    sessions: Arc<RwLock<HashMap<SessionKey, Session>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LongTermStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, user_id: &str) -> Result<Option<LongTermRecord>, StoreError> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn save(&self, record: &LongTermRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn append_interaction(
        &self,
        user_id: &str,
        query: &str,
        resolution: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<LongTermRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .entry(user_id.to_string())
            .or_insert_with(|| LongTermRecord::new(user_id));
        record.append(query, resolution, metadata);
        Ok(record.clone())
    }

    async fn recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<InteractionEntry>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(user_id)
            .map(|r| r.recent(limit))
            .unwrap_or_default())
    }

    async fn search(
        &self,
        user_id: &str,
        keyword: &str,
    ) -> Result<Vec<InteractionEntry>, StoreError> {
        let keyword = keyword.to_lowercase();
        let records = self.records.read().await;
        Ok(records
            .get(user_id)
            .map(|r| {
                r.user_history
                    .iter()
                    .filter(|e| {
                        e.query.to_lowercase().contains(&keyword)
                            || e.resolution.to_lowercase().contains(&keyword)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(user_id).is_some())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn load_session(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(key).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.key.clone(), session.clone());
        Ok(())
    }

    async fn remove_session(&self, key: &SessionKey) -> Result<bool, StoreError> {
        Ok(self.sessions.write().await.remove(key).is_some())
    }

    async fn list_suspended(&self) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut suspended: Vec<Session> = sessions
            .values()
            .filter(|s| s.status == SessionStatus::AwaitingReview)
            .cloned()
            .collect();
        suspended.sort_by_key(|s| s.updated_at);
        Ok(suspended)
    }
}
