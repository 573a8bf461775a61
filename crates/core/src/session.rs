//! The per-(user, thread) session: short-term buffer plus pipeline state.
//!
//! The buffer is append-only for the session's lifetime; trimming and
//! filtering only shape the *view* handed to the generator, never the
//! stored history. Durable history lives in [`crate::record::LongTermRecord`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, Role, SessionKey};

/// Where a session currently sits in the transition graph.
///
/// `Init → Classifying → {Responding | AwaitingReview} → Resolved`.
/// A `Resolved` turn re-arms: the thread accepts the next message.
/// `AwaitingReview` is an indefinite suspension point — only a reviewer
/// decision moves the session out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Init,
    Classifying,
    Responding,
    AwaitingReview,
    Resolved,
}

/// One active conversation, exclusively owned by the in-flight turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,

    /// Full message history, append-only within the session.
    pub messages: Vec<ChatMessage>,

    pub status: SessionStatus,

    /// Set from the classifier's complexity signal; once true the machine
    /// suspends until a reviewer resolves it.
    pub requires_hitl: bool,

    /// Tri-state reviewer decision: unset / approved / rejected.
    /// Only meaningful for the escalation it belongs to; retained after
    /// resolution so a duplicate decision can be rejected as already
    /// resolved.
    pub hitl_approved: Option<bool>,

    /// Session-scoped metadata. Merge-on-write: existing keys are never
    /// silently overwritten.
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session in `Init`.
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        let mut metadata = serde_json::Map::new();
        metadata.insert("created_at".into(), serde_json::json!(now.to_rfc3339()));
        metadata.insert("session_count".into(), serde_json::json!(1));
        Self {
            key,
            messages: Vec::new(),
            status: SessionStatus::Init,
            requires_hitl: false,
            hitl_approved: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message to the buffer.
    pub fn push(&mut self, message: ChatMessage) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// The last `n` messages in original order, without mutating history.
    pub fn recent(&self, n: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(n);
        self.messages[start..].to_vec()
    }

    /// The generation context: like [`recent`](Self::recent) but with noise
    /// filtered out first. System messages and messages carrying
    /// support-critical keywords always survive; greetings, one-word
    /// acknowledgements, very short messages, and immediate repeats are
    /// dropped.
    pub fn context_window(&self, n: usize) -> Vec<ChatMessage> {
        let kept = filter_noise(&self.messages);
        let start = kept.len().saturating_sub(n);
        kept[start..].to_vec()
    }

    /// The most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Empty the short-term buffer. Does not touch the long-term record,
    /// session metadata, or HITL flags.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }

    /// Merge metadata without overwriting: existing keys win, and each
    /// collision is recorded under `metadata_conflicts` for audit.
    pub fn merge_metadata(&mut self, incoming: serde_json::Map<String, serde_json::Value>) {
        let mut conflicts: Vec<serde_json::Value> = Vec::new();
        for (k, v) in incoming {
            match self.metadata.get(&k) {
                Some(existing) if *existing != v => {
                    conflicts.push(serde_json::json!({ "key": k, "rejected": v }));
                }
                Some(_) => {}
                None => {
                    self.metadata.insert(k, v);
                }
            }
        }
        if !conflicts.is_empty() {
            let entry = self
                .metadata
                .entry("metadata_conflicts".to_string())
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            if let serde_json::Value::Array(list) = entry {
                list.extend(conflicts);
            }
        }
        self.updated_at = Utc::now();
    }

    /// Bump the `session_count` metadata counter (a thread being resumed).
    pub fn bump_session_count(&mut self) {
        let next = self
            .metadata
            .get("session_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
            + 1;
        self.metadata.insert("session_count".into(), serde_json::json!(next));
    }

    /// A caller-facing snapshot of the session.
    pub fn snapshot(&self, history_count: usize) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.key.session_id(),
            user_id: self.key.user_id.clone(),
            thread_id: self.key.thread_id.clone(),
            status: self.status,
            history_count,
            requires_hitl: self.requires_hitl,
        }
    }
}

/// The view of a session returned by `start_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub user_id: String,
    pub thread_id: String,
    pub status: SessionStatus,
    pub history_count: usize,
    pub requires_hitl: bool,
}

/// Single words that mark a message as a greeting or farewell.
/// Matched against whole words — "hi" must not catch "this".
const GREETING_WORDS: &[&str] = &[
    "hello", "hi", "hey", "greetings", "bye", "goodbye", "farewell",
];

/// Multi-word greeting phrases, matched as substrings.
const GREETING_PHRASES: &[&str] = &["good morning", "good afternoon", "good evening", "see you"];

/// One-word acknowledgements with no actionable content.
const ACKNOWLEDGEMENTS: &[&str] = &[
    "ok", "okay", "thanks", "thank you", "got it", "understood", "sure", "alright",
];

/// Keywords that make a message support-critical and exempt from filtering.
const CRITICAL_KEYWORDS: &[&str] = &[
    "password", "reset", "account", "billing", "refund", "error", "problem", "issue",
    "help", "support",
];

const MIN_MESSAGE_LEN: usize = 10;

fn filter_noise(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut kept: Vec<ChatMessage> = Vec::with_capacity(messages.len());

    for msg in messages {
        let content = msg.content.trim().to_lowercase();

        // System messages and support-critical content always survive.
        if msg.role == Role::System
            || CRITICAL_KEYWORDS.iter().any(|k| content.contains(k))
        {
            kept.push(msg.clone());
            continue;
        }

        if content.len() < MIN_MESSAGE_LEN {
            continue;
        }
        if contains_greeting(&content) {
            continue;
        }
        if ACKNOWLEDGEMENTS.contains(&content.as_str()) {
            continue;
        }
        // Drop repeats of anything in the last three kept messages.
        if kept
            .iter()
            .rev()
            .take(3)
            .any(|m| m.content.trim().to_lowercase() == content)
        {
            continue;
        }

        kept.push(msg.clone());
    }

    kept
}

fn contains_greeting(content: &str) -> bool {
    if GREETING_PHRASES.iter().any(|p| content.contains(p)) {
        return true;
    }
    content
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| GREETING_WORDS.contains(&word))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(SessionKey::new("alice", "thread-1"))
    }

    #[test]
    fn new_session_starts_in_init() {
        let s = session();
        assert_eq!(s.status, SessionStatus::Init);
        assert!(!s.requires_hitl);
        assert!(s.hitl_approved.is_none());
        assert_eq!(s.metadata["session_count"], 1);
    }

    #[test]
    fn recent_returns_last_n_in_order_without_mutation() {
        let mut s = session();
        for i in 1..=8 {
            s.push(ChatMessage::user(format!("message number {i}")));
        }

        let recent = s.recent(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].content, "message number 4");
        assert_eq!(recent[4].content, "message number 8");
        // Full history untouched
        assert_eq!(s.messages.len(), 8);
    }

    #[test]
    fn context_window_drops_greetings_and_acks() {
        let mut s = session();
        s.push(ChatMessage::user("hello there"));
        s.push(ChatMessage::user("My billing statement shows a double charge"));
        s.push(ChatMessage::user("ok"));
        s.push(ChatMessage::user("The second charge appeared on Tuesday morning"));

        let ctx = s.context_window(5);
        assert_eq!(ctx.len(), 2);
        assert!(ctx[0].content.contains("billing"));
        assert_eq!(s.messages.len(), 4);
    }

    #[test]
    fn context_window_keeps_system_and_critical_messages() {
        let mut s = session();
        s.push(ChatMessage::system("hi"));
        s.push(ChatMessage::user("help"));

        let ctx = s.context_window(5);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn context_window_drops_repeats() {
        let mut s = session();
        s.push(ChatMessage::user("why is this feature not loading for me"));
        s.push(ChatMessage::user("why is this feature not loading for me"));

        let ctx = s.context_window(5);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn merge_metadata_never_overwrites() {
        let mut s = session();
        s.metadata.insert("channel".into(), serde_json::json!("cli"));

        let mut incoming = serde_json::Map::new();
        incoming.insert("channel".into(), serde_json::json!("web"));
        incoming.insert("locale".into(), serde_json::json!("en-US"));
        s.merge_metadata(incoming);

        assert_eq!(s.metadata["channel"], "cli");
        assert_eq!(s.metadata["locale"], "en-US");
        let conflicts = s.metadata["metadata_conflicts"].as_array().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0]["key"], "channel");
    }

    #[test]
    fn clear_empties_buffer_only() {
        let mut s = session();
        s.push(ChatMessage::user("a message worth keeping around"));
        s.metadata.insert("locale".into(), serde_json::json!("en-US"));
        s.clear();

        assert!(s.messages.is_empty());
        assert_eq!(s.metadata["locale"], "en-US");
    }

    #[test]
    fn bump_session_count_increments() {
        let mut s = session();
        s.bump_session_count();
        assert_eq!(s.metadata["session_count"], 2);
    }
}
