//! Domain event system — decoupled observation of pipeline activity.
//!
//! Events are published when something interesting happens: a turn resolves,
//! an escalation is raised or decided, persistence degrades. Front-ends and
//! reconciliation jobs subscribe without coupling to the state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A session was started or resumed
    SessionStarted {
        session_id: String,
        history_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn completed through the automated path
    MessageProcessed {
        session_id: String,
        intent: String,
        escalated: bool,
        timestamp: DateTime<Utc>,
    },

    /// A session was suspended for human review
    EscalationRaised {
        session_id: String,
        escalation_id: String,
        query_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A reviewer decided a pending escalation
    EscalationResolved {
        session_id: String,
        escalation_id: String,
        approved: bool,
        timestamp: DateTime<Utc>,
    },

    /// A store write failed but the reply was still delivered; the lost
    /// interaction needs reconciliation
    PersistenceDegraded {
        user_id: String,
        operation: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// An error was converted into the safe fallback reply
    ErrorOccurred {
        session_id: String,
        error_code: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Subscribers
/// receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
