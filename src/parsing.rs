//! Parsing utilities for LLM responses.
//!
//! Small text cleanups applied to completion output before it is
//! parsed or compared.

/// Strip a surrounding markdown code fence, if present.
///
/// Recognizes `` ```json ``, `` ```JSON `` and plain `` ``` `` openers. Text
/// without a fence is returned trimmed.
pub fn strip_code_fence(text: &str) -> &str {
    let mut trimmed = text.trim();
    for marker in ["```json", "```JSON", "```"] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            trimmed = rest;
            break;
        }
    }
    let trimmed = trimmed.trim();
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Remove one leading and one trailing quote character (`"` or `'`), then trim.
pub fn strip_wrapping_quotes(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix(['"', '\''])
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(['"', '\'']).unwrap_or(trimmed);
    trimmed.trim()
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Normalize a yes/no completion: `true` iff it starts with "yes".
pub fn is_affirmative(answer: &str) -> bool {
    answer.trim().to_lowercase().starts_with("yes")
}
