//! Playbook generator — canned responses with history-aware
//! personalization.
//!
//! Authentication queries get a step-by-step playbook chosen by exact or
//! fuzzy match; other known intents get a knowledge-base response when the
//! classifier was confident enough; everything else gets a clarification
//! prompt. Users with related history get a follow-up preamble.

use async_trait::async_trait;
use crabdesk_core::capability::{GenerationContext, Generator};
use crabdesk_core::error::CapabilityError;
use tracing::debug;

/// Minimum classifier confidence before a knowledge-base answer is used.
const KB_CONFIDENCE_FLOOR: f32 = 0.3;

/// Word-overlap ratio above which two queries count as the same playbook.
const FUZZY_MATCH_RATIO: f32 = 0.5;

/// Shared words (stopwords removed) for two queries to count as related.
const RELATED_OVERLAP: usize = 2;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "how", "what", "when", "where", "can", "my", "i", "do", "to",
];

/// An authentication playbook keyed by its canonical question.
struct Playbook {
    question: &'static str,
    answer: &'static str,
}

const AUTH_PLAYBOOKS: &[Playbook] = &[
    Playbook {
        question: "how do i reset my password",
        answer: "To reset your password:\n\n\
            1. Visit the login page and click \"Forgot Password?\"\n\
            2. Enter your registered email address\n\
            3. Check your email for a password reset link (may take up to 5 minutes)\n\
            4. Click the link and create a new secure password\n\
            5. New passwords need at least 8 characters with uppercase, lowercase, and numbers\n\n\
            If the email doesn't arrive, check your spam folder or contact support.",
    },
    Playbook {
        question: "my account is locked what should i do",
        answer: "If your account is locked:\n\n\
            1. Wait 15 minutes — temporary locks often resolve automatically\n\
            2. Try the \"Forgot Password?\" option to reset your credentials\n\
            3. Clear your browser cache and cookies, then try again\n\
            4. Repeated failed logins extend the lock\n\n\
            For immediate assistance, contact support with your username or email address.",
    },
    Playbook {
        question: "how do i change my password",
        answer: "To change your password while logged in:\n\n\
            1. Go to Account Settings → Security\n\
            2. Click \"Change Password\"\n\
            3. Enter your current password, then the new one twice\n\
            4. Click \"Update Password\"\n\n\
            You'll receive a confirmation email, and all devices are logged out for safety.",
    },
    Playbook {
        question: "i can't log in to my account",
        answer: "Let's troubleshoot the login issue:\n\n\
            1. Check you're using the correct email/username and password\n\
            2. Use \"Forgot Password?\" if you're unsure about the password\n\
            3. Clear browser data or try a different browser\n\
            4. The account may be temporarily locked after failed attempts\n\
            5. Make sure your email address is verified\n\n\
            If none of that works, contact support with your registered email.",
    },
    Playbook {
        question: "how do i enable two-factor authentication",
        answer: "To enable two-factor authentication (2FA):\n\n\
            1. Go to Account Settings → Security\n\
            2. Click \"Enable 2FA\" and scan the QR code with an authenticator app\n\
            3. Enter the 6-digit code from the app to verify\n\
            4. Save your backup codes somewhere safe\n\n\
            2FA protects your account even if the password leaks.",
    },
    Playbook {
        question: "my session keeps timing out why",
        answer: "Session timeouts usually come from:\n\n\
            1. Inactivity — sessions expire after 30 minutes idle\n\
            2. Browser settings clearing cookies\n\
            3. Logging in from another device\n\n\
            Staying active and enabling \"Remember me\" minimizes timeouts. Contact support \
            if they're unusually frequent.",
    },
];

const AUTH_FALLBACK: &str = "I understand you're having an account or authentication issue. \
    Some general steps that might help:\n\n\
    1. Try resetting your password with \"Forgot Password?\"\n\
    2. Clear your browser cache and cookies\n\
    3. Check your email for account notifications\n\
    4. Contact support if the issue persists\n\n\
    Is there a specific authentication problem you're experiencing?";

/// A knowledge-base entry keyed by intent.
struct KbEntry {
    intent: &'static str,
    answer: &'static str,
}

const KNOWLEDGE_BASE: &[KbEntry] = &[
    KbEntry {
        intent: "password_reset",
        answer: "To reset your password:\n\n\
            1. Go to the login page\n\
            2. Click \"Forgot Password?\" and enter your registered email\n\
            3. Follow the reset link (it expires in 24 hours)\n\
            4. Create a new password: 8+ characters, mixed case, numbers\n\n\
            If the email doesn't arrive, check your spam folder.",
    },
    KbEntry {
        intent: "billing",
        answer: "For billing-related inquiries:\n\n\
            • View billing details: Account Settings > Billing & Payments\n\
            • Download invoices: Billing section > Invoice History\n\
            • Update payment method: Settings > Payment Methods\n\
            • View subscription plans: Account > Subscription\n\n\
            For an incorrect charge, reply with the transaction ID and date.",
    },
    KbEntry {
        intent: "features",
        answer: "Happy to help with our features. Quick starting points:\n\n\
            • Getting Started Guide: docs/getting-started\n\
            • Feature Tutorials: docs/features\n\
            • API Documentation: api/docs\n\n\
            Which specific feature would you like to learn about?",
    },
    KbEntry {
        intent: "account",
        answer: "For account management:\n\n\
            • Edit Profile: Settings > Profile Information\n\
            • Security Settings: Settings > Security & Privacy\n\
            • Notification Preferences: Settings > Notifications\n\
            • Data Export: Settings > Privacy > Export Data\n\n\
            What specific account setting would you like to change?",
    },
    KbEntry {
        intent: "technical_issue",
        answer: "I'll help you resolve this technical issue. Please provide:\n\n\
            1. The error message (if any)\n\
            2. What you were trying to do\n\
            3. Browser/device information\n\
            4. When the issue started\n\n\
            Meanwhile: clear the browser cache, try another browser, and disable extensions.",
    },
];

/// The bundled templated generator.
#[derive(Debug, Default)]
pub struct PlaybookGenerator;

impl PlaybookGenerator {
    pub fn new() -> Self {
        Self
    }

    fn auth_response(query: &str) -> &'static str {
        let normalized = normalize(query);

        // Exact match first
        if let Some(p) = AUTH_PLAYBOOKS.iter().find(|p| p.question == normalized) {
            return p.answer;
        }

        // Fuzzy: word-overlap against each canonical question
        for p in AUTH_PLAYBOOKS {
            if word_overlap_ratio(&normalized, p.question) > FUZZY_MATCH_RATIO {
                return p.answer;
            }
        }

        AUTH_FALLBACK
    }

    fn kb_response(intent: &str) -> Option<&'static str> {
        KNOWLEDGE_BASE
            .iter()
            .find(|e| e.intent == intent)
            .map(|e| e.answer)
    }

    fn clarification(query: &str) -> String {
        format!(
            "Thank you for your question about \"{query}\".\n\n\
            I'd be happy to help. Could you share a bit more detail:\n\
            • What you're trying to accomplish\n\
            • Any error messages you're seeing\n\
            • When this started\n\n\
            That will let me give you the most accurate assistance."
        )
    }

    /// Prepend a follow-up preamble when the user asked about related
    /// topics before.
    fn personalize(base: String, context: &GenerationContext) -> String {
        let related = context
            .history
            .iter()
            .take(3)
            .any(|entry| queries_related(&context.query, &entry.query));

        if related {
            format!(
                "I see you previously asked about similar topics. {base}\n\n\
                Based on your history, I can also help with any follow-up questions."
            )
        } else {
            base
        }
    }
}

#[async_trait]
impl Generator for PlaybookGenerator {
    fn name(&self) -> &str {
        "playbook"
    }

    async fn generate(
        &self,
        intent: &str,
        context: &GenerationContext,
    ) -> Result<String, CapabilityError> {
        debug!(intent, confidence = context.confidence, "Generating response");

        if intent == "authentication" {
            return Ok(Self::auth_response(&context.query).to_string());
        }

        let base = match Self::kb_response(intent) {
            Some(answer) if context.confidence > KB_CONFIDENCE_FLOOR => answer.to_string(),
            _ => Self::clarification(&context.query),
        };

        Ok(Self::personalize(base, context))
    }
}

fn normalize(query: &str) -> String {
    query
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '?' | '!' | '.' | ','))
        .collect::<String>()
        .trim()
        .to_string()
}

fn word_overlap_ratio(a: &str, b: &str) -> f32 {
    let words_a: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let words_b: std::collections::HashSet<&str> = b.split_whitespace().collect();
    let min_len = words_a.len().min(words_b.len());
    if min_len == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f32 / min_len as f32
}

fn queries_related(a: &str, b: &str) -> bool {
    let significant = |s: &str| -> std::collections::HashSet<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
            .map(str::to_string)
            .collect()
    };
    significant(a).intersection(&significant(b)).count() >= RELATED_OVERLAP
}
