//! Escalation items — the work units of the human review queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::Classification;
use crate::message::SessionKey;

/// One pending human review, created when a session's complexity signal
/// flips it into `AwaitingReview`. Removed when the reviewer decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationItem {
    pub id: String,

    /// The suspended session this item belongs to.
    pub key: SessionKey,

    /// The triggering user message, verbatim.
    pub query: String,

    /// Intent label the classifier assigned.
    pub intent: String,

    /// Reviewer-facing summary of what the automated pipeline would do.
    pub proposed_action: String,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl EscalationItem {
    pub fn new(key: SessionKey, query: impl Into<String>, classification: &Classification) -> Self {
        let query = query.into();
        let mut metadata = serde_json::Map::new();
        metadata.insert("confidence".into(), serde_json::json!(classification.confidence));
        Self {
            id: Uuid::new_v4().to_string(),
            key,
            proposed_action: proposed_action_for(&query),
            query,
            intent: classification.intent.clone(),
            created_at: Utc::now(),
            metadata,
        }
    }
}

/// Map a query onto the action a reviewer would be approving.
///
/// Display-only guidance for the review surface; the pipeline never acts on
/// this string.
pub fn proposed_action_for(query: &str) -> String {
    let q = query.to_lowercase();

    let action = if q.contains("password") && (q.contains("reset") || q.contains("forgot")) {
        "Send password reset link to the user's registered email address"
    } else if q.contains("account") && q.contains("locked") {
        "Unlock the account and send a confirmation email"
    } else if q.contains("refund") || q.contains("billing") {
        "Process the refund request and update billing records"
    } else if q.contains("2fa") || q.contains("two-factor") {
        "Provide 2FA setup instructions and backup codes"
    } else if q.contains("delete") && q.contains("account") {
        "Initiate account deletion (30-day grace period)"
    } else if q.contains("subscription") && q.contains("cancel") {
        "Cancel the subscription and send confirmation"
    } else if q.contains("security") || q.contains("breach") {
        "Escalate to the security team for immediate investigation"
    } else if q.contains("legal") || q.contains("lawsuit") {
        "Forward to the legal department for review"
    } else {
        "Send a comprehensive support response with an escalation option"
    };

    action.to_string()
}
