//! Small helpers shared across the widget runtime.

/// Generate a fresh visitor/message token.
///
/// Tokens are opaque to the backend; a v4 UUID without hyphens keeps them
/// URL-safe and unique per session.
pub fn create_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Cuts on character boundaries, so multi-byte input (emoji, CJK) is safe.
/// Used to keep command payload excerpts in log lines bounded.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Render a JSON value as a bounded single-line excerpt for logging.
pub fn json_excerpt(value: &serde_json::Value, max_chars: usize) -> String {
    let raw = serde_json::to_string(value).unwrap_or_else(|_| "<unserializable>".to_string());
    truncate_with_ellipsis(&raw, max_chars)
}
