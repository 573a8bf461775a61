//! Response formatting helpers for front-ends.

use chrono::Utc;

/// Maximum response length before truncation kicks in.
const DEFAULT_TRUNCATE_AT: usize = 500;

/// Presentation helpers; the pipeline stores the raw text, front-ends
/// decorate it.
pub struct ResponseFormatter;

impl ResponseFormatter {
    /// Prefix a response with a timestamp line.
    pub fn with_timestamp(response: &str) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        format!("[{timestamp}]\n\n{response}")
    }

    /// Append a category/confidence footer.
    pub fn with_metadata(response: &str, intent: &str, confidence: f32) -> String {
        format!(
            "{response}\n\n---\nCategory: {intent}\nConfidence: {:.0}%",
            confidence * 100.0
        )
    }

    /// Truncate long responses at a char boundary with a continuation notice.
    pub fn truncate(response: &str, max_length: usize) -> String {
        if response.chars().count() <= max_length {
            return response.to_string();
        }
        let cut: String = response.chars().take(max_length).collect();
        format!("{cut}...\n\n[Response truncated. Would you like more details?]")
    }

    /// [`truncate`](Self::truncate) with the default limit.
    pub fn truncate_default(response: &str) -> String {
        Self::truncate(response, DEFAULT_TRUNCATE_AT)
    }
}
