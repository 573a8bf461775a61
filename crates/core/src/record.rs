//! The durable per-user record: cross-session interaction history.
//!
//! Persisted field names (`user_id`, `user_history`, `metadata`,
//! `last_updated`) are a compatibility contract — existing stores written
//! with this layout must keep loading after upgrades.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One resolved interaction: what the user asked and how it was resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEntry {
    pub query: String,
    pub resolution: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// The long-term record for one user, durable across sessions.
///
/// Created on first interaction, appended to on every resolved turn, never
/// deleted by the pipeline itself (deletion is an administrative operation
/// on the store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermRecord {
    pub user_id: String,

    /// Append-only, oldest first.
    #[serde(default)]
    pub user_history: Vec<InteractionEntry>,

    /// User-level facts, distinct from session metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Bumped on every append, in the same mutation as the append itself.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl LongTermRecord {
    /// Create an empty record for a user who has no history yet.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_history: Vec::new(),
            metadata: serde_json::Map::new(),
            last_updated: None,
        }
    }

    /// Append an interaction and bump `last_updated` in one step.
    pub fn append(
        &mut self,
        query: impl Into<String>,
        resolution: impl Into<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        let now = Utc::now();
        self.user_history.push(InteractionEntry {
            query: query.into(),
            resolution: resolution.into(),
            timestamp: now,
            metadata,
        });
        self.last_updated = Some(now);
    }

    /// The most recent `limit` interactions, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<InteractionEntry> {
        self.user_history.iter().rev().take(limit).cloned().collect()
    }

    /// A compact textual summary of recent interactions, fed to the
    /// classifier as user context.
    pub fn summary(&self, limit: usize) -> String {
        if self.user_history.is_empty() {
            return String::new();
        }
        let mut out = String::from("Previous interactions:\n");
        for entry in self.user_history.iter().rev().take(limit) {
            out.push_str(&format!("- {}\n", entry.query));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_bumps_last_updated() {
        let mut record = LongTermRecord::new("alice");
        assert!(record.last_updated.is_none());

        record.append("How do I reset my password?", "Sent reset steps", serde_json::Map::new());
        assert_eq!(record.user_history.len(), 1);
        let stamped = record.last_updated.expect("last_updated set");
        assert_eq!(record.user_history[0].timestamp, stamped);
    }

    #[test]
    fn recent_returns_most_recent_first() {
        let mut record = LongTermRecord::new("alice");
        for i in 1..=4 {
            record.append(format!("query {i}"), format!("resolution {i}"), serde_json::Map::new());
        }

        let recent = record.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query, "query 4");
        assert_eq!(recent[1].query, "query 3");
    }

    #[test]
    fn persisted_field_names_are_stable() {
        let mut record = LongTermRecord::new("alice");
        record.append("q", "r", serde_json::Map::new());
        let json = serde_json::to_value(&record).unwrap();

        assert!(json.get("user_id").is_some());
        assert!(json.get("user_history").is_some());
        assert!(json.get("last_updated").is_some());
        let entry = &json["user_history"][0];
        assert!(entry.get("query").is_some());
        assert!(entry.get("resolution").is_some());
        assert!(entry.get("timestamp").is_some());
    }

    #[test]
    fn summary_lists_recent_queries() {
        let mut record = LongTermRecord::new("alice");
        record.append("billing question", "answered", serde_json::Map::new());
        let summary = record.summary(5);
        assert!(summary.contains("billing question"));
        assert!(LongTermRecord::new("bob").summary(5).is_empty());
    }
}
