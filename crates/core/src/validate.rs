//! State validation — fail fast, before any mutation.
//!
//! Roles are a closed enum and metadata is a `serde_json::Map`, so those two
//! invariants hold by construction; what remains is identifier shape and
//! message content, checked here at every entry point.

use crate::error::PipelineError;
use crate::message::{ChatMessage, SessionKey};

/// Maximum identifier length accepted for user and thread ids.
const MAX_IDENTIFIER_LEN: usize = 128;

/// Validate one identifier: non-empty, bounded, `[A-Za-z0-9._-]` only.
///
/// The charset keeps ids safe to embed in file names and session ids.
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), PipelineError> {
    if value.is_empty() {
        return Err(PipelineError::InvalidIdentifier {
            field,
            reason: "must not be empty".into(),
        });
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(PipelineError::InvalidIdentifier {
            field,
            reason: format!("must be at most {MAX_IDENTIFIER_LEN} characters"),
        });
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(PipelineError::InvalidIdentifier {
            field,
            reason: format!("contains disallowed character {bad:?}"),
        });
    }
    Ok(())
}

/// Validate a session key (both identifiers).
pub fn validate_key(key: &SessionKey) -> Result<(), PipelineError> {
    validate_identifier("user_id", &key.user_id)?;
    validate_identifier("thread_id", &key.thread_id)?;
    Ok(())
}

/// Validate a message before it enters a session buffer.
pub fn validate_message(message: &ChatMessage) -> Result<(), PipelineError> {
    if message.content.trim().is_empty() {
        return Err(PipelineError::InvalidState(
            "message content must not be empty".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_identifiers() {
        assert!(validate_identifier("user_id", "user_12345").is_ok());
        assert!(validate_identifier("thread_id", "thread-001.a").is_ok());
    }

    #[test]
    fn rejects_empty_identifier() {
        let err = validate_identifier("user_id", "").unwrap_err();
        assert!(err.to_string().contains("user_id"));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(validate_identifier("user_id", "alice/..").is_err());
        assert!(validate_identifier("user_id", "bob smith").is_err());
        assert!(validate_identifier("thread_id", "t\u{1F980}").is_err());
    }

    #[test]
    fn rejects_overlong_identifier() {
        let long = "a".repeat(200);
        assert!(validate_identifier("user_id", &long).is_err());
    }

    #[test]
    fn rejects_blank_message_content() {
        let msg = ChatMessage::user("   ");
        assert!(validate_message(&msg).is_err());
        assert!(validate_message(&ChatMessage::user("real content")).is_ok());
    }
}
