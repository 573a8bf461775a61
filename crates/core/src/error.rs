//! Error types for the Crabdesk domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Crabdesk operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Pipeline / state-machine contract errors ---
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    // --- External capability errors ---
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Contract violations raised by the conversation state machine.
///
/// These are surfaced directly to the caller and never silently corrected.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Invalid {field}: {reason}")]
    InvalidIdentifier { field: &'static str, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No pending escalation for session {session_id}")]
    NoPendingEscalation { session_id: String },

    #[error("Escalation for session {session_id} is already resolved")]
    AlreadyResolved { session_id: String },

    #[error("Session {session_id} has an escalation in progress")]
    EscalationInProgress { session_id: String },
}

/// Failures of the consumed classify/generate capabilities.
///
/// Retryable up to a configured bound; exhausting retries either falls back
/// to an escalation or surfaces the failure.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Capability '{capability}' unavailable: {reason}")]
    Unavailable { capability: String, reason: String },

    #[error("Capability '{capability}' timed out after {timeout_secs}s")]
    Timeout { capability: String, timeout_secs: u64 },
}

impl CapabilityError {
    /// Which capability failed ("classify" or "generate").
    pub fn capability(&self) -> &str {
        match self {
            Self::Unavailable { capability, .. } | Self::Timeout { capability, .. } => capability,
        }
    }
}

/// Failures of the durable store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Stored record corrupted: {0}")]
    Corrupted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_displays_session() {
        let err = Error::Pipeline(PipelineError::NoPendingEscalation {
            session_id: "alice_thread-1".into(),
        });
        assert!(err.to_string().contains("alice_thread-1"));
        assert!(err.to_string().contains("No pending escalation"));
    }

    #[test]
    fn capability_error_names_capability() {
        let err = CapabilityError::Timeout {
            capability: "generate".into(),
            timeout_secs: 30,
        };
        assert_eq!(err.capability(), "generate");
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn store_error_converts_to_top_level() {
        let err: Error = StoreError::Unavailable("disk full".into()).into();
        assert!(err.to_string().contains("disk full"));
    }
}
