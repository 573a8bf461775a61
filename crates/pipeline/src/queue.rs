//! The escalation queue — FIFO for reviewer display, keyed for decisions.
//!
//! Exactly one pending item may exist per session; the per-key session lock
//! in the pipeline serializes same-key operations, so the duplicate check
//! here is a contract backstop, not the primary guard.

use crabdesk_core::error::PipelineError;
use crabdesk_core::escalation::EscalationItem;
use crabdesk_core::message::SessionKey;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::debug;

/// Ordered pending reviews, addressable by session key.
pub struct EscalationQueue {
    inner: Mutex<VecDeque<EscalationItem>>,
}

impl EscalationQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Add a pending review. Fails if the session already has one.
    pub async fn enqueue(&self, item: EscalationItem) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().await;
        if inner.iter().any(|i| i.key == item.key) {
            return Err(PipelineError::EscalationInProgress {
                session_id: item.key.session_id(),
            });
        }
        debug!(session = %item.key, escalation = %item.id, "Escalation enqueued");
        inner.push_back(item);
        Ok(())
    }

    /// Remove and return the pending item for a session, if any.
    pub async fn dequeue_by_key(&self, key: &SessionKey) -> Option<EscalationItem> {
        let mut inner = self.inner.lock().await;
        let pos = inner.iter().position(|i| &i.key == key)?;
        inner.remove(pos)
    }

    /// All pending items in creation order (oldest first).
    pub async fn list_pending(&self) -> Vec<EscalationItem> {
        self.inner.lock().await.iter().cloned().collect()
    }

    /// Whether a session has a pending item.
    pub async fn contains_key(&self, key: &SessionKey) -> bool {
        self.inner.lock().await.iter().any(|i| &i.key == key)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

impl Default for EscalationQueue {
    fn default() -> Self {
        Self::new()
    }
}
