//! File-backed store — one JSON document per user record, one per
//! suspended session.
//!
//! Layout under the storage directory:
//! - `user_<user_id>.json`     — the long-term record (compatibility
//!   contract: `{user_id, user_history, metadata, last_updated}`)
//! - `session_<user>_<thread>.json` — a suspended session awaiting review
//!
//! Identifiers are validated upstream to `[A-Za-z0-9._-]`, so embedding
//! them in file names is safe. Every mutation is a full-document write:
//! `append_interaction` loads, mutates, and writes once, which keeps the
//! history append and the `last_updated` bump atomic with respect to each
//! other.

use async_trait::async_trait;
use crabdesk_core::error::StoreError;
use crabdesk_core::message::SessionKey;
use crabdesk_core::record::{InteractionEntry, LongTermRecord};
use crabdesk_core::session::{Session, SessionStatus};
use crabdesk_core::store::{LongTermStore, SessionStore};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A file-backed store rooted at a storage directory.
pub struct FileStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles across sessions of one process.
    /// Per-key pipeline locks don't cover two threads of the same user.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first
    /// write, not here.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File store initialized");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn user_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("user_{user_id}.json"))
    }

    fn session_path(&self, key: &SessionKey) -> PathBuf {
        self.dir
            .join(format!("session_{}_{}.json", key.user_id, key.thread_id))
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupted(format!("{}: {e}", path.display())))
    }

    fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            StoreError::Unavailable(format!("failed to create storage directory: {e}"))
        })?;

        let content = serde_json::to_string_pretty(value)
            .map_err(|e| StoreError::Corrupted(format!("serialization failed: {e}")))?;

        std::fs::write(path, content).map_err(|e| {
            StoreError::Unavailable(format!("failed to write {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl LongTermStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, user_id: &str) -> Result<Option<LongTermRecord>, StoreError> {
        Self::read_json(&self.user_path(user_id))
    }

    async fn save(&self, record: &LongTermRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_json(&self.user_path(&record.user_id), record)
    }

    async fn append_interaction(
        &self,
        user_id: &str,
        query: &str,
        resolution: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<LongTermRecord, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut record = Self::read_json::<LongTermRecord>(&self.user_path(user_id))?
            .unwrap_or_else(|| LongTermRecord::new(user_id));
        record.append(query, resolution, metadata);

        self.write_json(&self.user_path(user_id), &record)?;
        Ok(record)
    }

    async fn recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<InteractionEntry>, StoreError> {
        Ok(self
            .load(user_id)
            .await?
            .map(|r| r.recent(limit))
            .unwrap_or_default())
    }

    async fn search(
        &self,
        user_id: &str,
        keyword: &str,
    ) -> Result<Vec<InteractionEntry>, StoreError> {
        let keyword = keyword.to_lowercase();
        Ok(self
            .load(user_id)
            .await?
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
        let _guard = self.write_lock.lock().await;
        match std::fs::remove_file(self.user_path(user_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Unavailable(format!(
                "failed to purge record for {user_id}: {e}"
            ))),
        }
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn load_session(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        Self::read_json(&self.session_path(key))
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_json(&self.session_path(&session.key), session)
    }

    async fn remove_session(&self, key: &SessionKey) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        match std::fs::remove_file(self.session_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Unavailable(format!(
                "failed to remove session {key}: {e}"
            ))),
        }
    }

    async fn list_suspended(&self) -> Result<Vec<Session>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "failed to list storage directory: {e}"
                )));
            }
        };

        let mut suspended = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("session_") || !name.ends_with(".json") {
                continue;
            }
            match Self::read_json::<Session>(&entry.path()) {
                Ok(Some(session)) if session.status == SessionStatus::AwaitingReview => {
                    suspended.push(session);
                }
                Ok(_) => {}
                Err(e) => {
                    // A corrupted session file shouldn't block reviving the rest.
                    warn!(file = %name, error = %e, "Skipping unreadable suspended session");
                }
            }
        }

        suspended.sort_by_key(|s| s.updated_at);
        Ok(suspended)
    }
}
