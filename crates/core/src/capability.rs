//! Consumed capability traits — classification and generation.
//!
//! The pipeline never inspects message text itself; deciding *what* a query
//! is about and *how* to answer it are capabilities injected behind these
//! traits. Reference rule-based implementations live in `crabdesk-providers`;
//! a remote NLU provider slots in without touching orchestration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;
use crate::message::ChatMessage;
use crate::record::InteractionEntry;

/// The classifier's routing signal: does this query need a human?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexitySignal {
    /// Safe for the automated path.
    #[default]
    Routine,
    /// Suspend and escalate to a human reviewer.
    Elevated,
}

/// The result of classifying one user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Intent label (e.g. "password_reset", "billing", "general").
    pub intent: String,

    /// Complexity routing signal.
    pub complexity: ComplexitySignal,

    /// Normalized confidence in the intent label, 0.0..=1.0.
    pub confidence: f32,
}

impl Classification {
    pub fn is_elevated(&self) -> bool {
        self.complexity == ComplexitySignal::Elevated
    }
}

/// Everything the generator may draw on to produce a reply.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    /// The query being answered.
    pub query: String,

    /// Confidence the classifier had in the intent.
    pub confidence: f32,

    /// Trimmed, filtered recent session messages.
    pub recent_messages: Vec<ChatMessage>,

    /// Compact summary of the user's durable history.
    pub user_summary: String,

    /// Recent durable interactions, most recent first.
    pub history: Vec<InteractionEntry>,
}

/// Classifies a message into an intent plus a complexity signal.
///
/// Expected to be deterministic for a given (message, context) pair so the
/// pipeline's routing is reproducible.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// A human-readable name for this classifier (e.g. "rules").
    fn name(&self) -> &str;

    async fn classify(
        &self,
        message: &str,
        session_context: &[ChatMessage],
        user_summary: &str,
    ) -> Result<Classification, CapabilityError>;
}

/// Produces candidate response text for a classified intent.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name for this generator (e.g. "playbook").
    fn name(&self) -> &str;

    async fn generate(
        &self,
        intent: &str,
        context: &GenerationContext,
    ) -> Result<String, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_defaults_to_routine() {
        assert_eq!(ComplexitySignal::default(), ComplexitySignal::Routine);
    }

    #[test]
    fn classification_elevation_check() {
        let c = Classification {
            intent: "escalation".into(),
            complexity: ComplexitySignal::Elevated,
            confidence: 1.0,
        };
        assert!(c.is_elevated());
    }

    #[test]
    fn complexity_serializes_snake_case() {
        let json = serde_json::to_string(&ComplexitySignal::Elevated).unwrap();
        assert_eq!(json, r#""elevated""#);
    }
}
