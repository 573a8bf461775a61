//! Rule-based classifier — the bundled complexity-signal policy.
//!
//! Escalation policy: a message is `Elevated` when it contains an escalation
//! indicator phrase (refunds, legal language, security incidents, explicit
//! requests for a human), piles up question marks, or is shouted in all
//! caps. Everything else is `Routine`, labeled by keyword scoring over a
//! small category table.

use async_trait::async_trait;
use crabdesk_core::capability::{Classification, Classifier, ComplexitySignal};
use crabdesk_core::error::CapabilityError;
use crabdesk_core::message::ChatMessage;
use tracing::debug;

/// Phrases that force escalation regardless of category.
const ESCALATION_INDICATORS: &[&str] = &[
    "refund",
    "legal",
    "escalate",
    "manager",
    "complaint",
    "lawsuit",
    "security breach",
    "data leak",
    "unauthorized access",
    "fraud",
    "billing dispute",
    "cancel subscription",
    "speak to a human",
    "talk to a human",
];

/// Messages with more question marks than this read as frustration.
const MAX_QUESTION_MARKS: usize = 2;

/// All-caps messages shorter than this are probably acronyms, not shouting.
const MIN_SHOUTING_LEN: usize = 20;

/// Keywords that mark a query as authentication/account-access related.
const AUTH_KEYWORDS: &[&str] = &[
    "password", "login", "log in", "sign in", "access", "account", "credentials", "locked",
    "reset", "forgot", "2fa", "two-factor", "authentication", "authenticator", "session",
    "timeout", "username", "invalid",
];

struct CategoryRule {
    intent: &'static str,
    keywords: &'static [&'static str],
}

const CATEGORIES: &[CategoryRule] = &[
    CategoryRule {
        intent: "password_reset",
        keywords: &["password", "reset", "forgot", "login", "access"],
    },
    CategoryRule {
        intent: "billing",
        keywords: &["billing", "payment", "invoice", "charge", "subscription", "cost"],
    },
    CategoryRule {
        intent: "features",
        keywords: &["feature", "how to", "tutorial", "guide", "use"],
    },
    CategoryRule {
        intent: "account",
        keywords: &["account", "profile", "settings", "preferences"],
    },
    CategoryRule {
        intent: "technical_issue",
        keywords: &["error", "bug", "not working", "crash", "issue", "problem"],
    },
];

/// The bundled keyword/sentiment classifier.
#[derive(Debug, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Does this message require a human reviewer?
    fn is_complex(message: &str) -> bool {
        let lower = message.to_lowercase();

        if ESCALATION_INDICATORS.iter().any(|i| lower.contains(i)) {
            return true;
        }
        if message.matches('?').count() > MAX_QUESTION_MARKS {
            return true;
        }
        // Sustained all-caps: has letters, none of them lowercase.
        let has_alpha = message.chars().any(char::is_alphabetic);
        if has_alpha
            && message.len() > MIN_SHOUTING_LEN
            && !message.chars().any(char::is_lowercase)
        {
            return true;
        }

        false
    }

    fn is_authentication(message: &str) -> bool {
        let lower = message.to_lowercase();
        AUTH_KEYWORDS.iter().any(|k| lower.contains(k))
    }

    /// Score the category table; returns (intent, normalized confidence).
    fn analyze(message: &str) -> (&'static str, f32) {
        let lower = message.to_lowercase();
        let mut best: (&'static str, usize) = ("general", 0);

        for rule in CATEGORIES {
            let score = rule.keywords.iter().filter(|k| lower.contains(*k)).count();
            if score > best.1 {
                best = (rule.intent, score);
            }
        }

        if best.1 == 0 {
            return ("general", 0.0);
        }
        (best.0, (best.1 as f32 / 3.0).min(1.0))
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    fn name(&self) -> &str {
        "rules"
    }

    async fn classify(
        &self,
        message: &str,
        _session_context: &[ChatMessage],
        user_summary: &str,
    ) -> Result<Classification, CapabilityError> {
        if Self::is_complex(message) {
            let preview: String = message.chars().take(60).collect();
            debug!(%preview, "Message flagged for review");
            return Ok(Classification {
                intent: "escalation".into(),
                complexity: ComplexitySignal::Elevated,
                confidence: 1.0,
            });
        }

        if Self::is_authentication(message) {
            return Ok(Classification {
                intent: "authentication".into(),
                complexity: ComplexitySignal::Routine,
                confidence: 0.95,
            });
        }

        let (intent, confidence) = Self::analyze(message);
        debug!(intent, confidence, has_history = !user_summary.is_empty(), "Classified message");
        Ok(Classification {
            intent: intent.into(),
            complexity: ComplexitySignal::Routine,
            confidence,
        })
    }
}
