//! Message and session-key value objects.
//!
//! These are the core value types that flow through the entire system:
//! a user sends a message → the pipeline classifies it → either the
//! generator answers or a reviewer decides → the resolution is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one conversation: a (user, thread) pair.
///
/// Both identifiers are opaque, non-empty, and immutable once a session
/// starts. The rendered form `user_thread` doubles as the session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: String,
    pub thread_id: String,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: thread_id.into(),
        }
    }

    /// The session id used in logs, errors, and persisted file names.
    pub fn session_id(&self) -> String {
        format!("{}_{}", self.user_id, self.thread_id)
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.user_id, self.thread_id)
    }
}

/// The role of a message sender. Closed set — anything else is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user asking for support
    User,
    /// The automated agent (or a human-approved reply delivered as the agent)
    Agent,
    /// System notices (session banners, audit markers)
    System,
}

/// A single message in a session buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (intent, confidence, review markers, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new agent message.
    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Attach a metadata key to this message (builder style).
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_renders_session_id() {
        let key = SessionKey::new("alice", "thread-1");
        assert_eq!(key.session_id(), "alice_thread-1");
        assert_eq!(key.to_string(), "alice_thread-1");
    }

    #[test]
    fn create_user_message() {
        let msg = ChatMessage::user("I can't log in");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "I can't log in");
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = ChatMessage::agent("Try resetting your password")
            .with_meta("intent", serde_json::json!("password_reset"));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"agent""#));
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Agent);
        assert_eq!(back.metadata["intent"], "password_reset");
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), r#""system""#);
    }
}
