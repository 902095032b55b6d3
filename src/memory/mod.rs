pub mod export;
pub mod forget;
pub mod retention;
pub mod retrieval;
pub mod stats;
pub mod store;
pub mod types;

/// Current UTC time as an RFC 3339 string (the storage timestamp format).
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Truncate content to max_chars, appending "..." if truncated.
pub fn truncate_preview(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        content.to_string()
    } else {
        // Find a clean char boundary
        let end = content
            .char_indices()
            .take_while(|(i, _)| *i < max_chars)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(max_chars);
        format!("{}...", &content[..end])
    }
}
