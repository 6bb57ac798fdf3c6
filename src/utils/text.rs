//! Text processing utilities.

/// Rough tokens-per-word ratio used for ingestion statistics.
pub const TOKENS_PER_WORD: f64 = 1.3;

/// Estimate the token count of a text from its whitespace-separated words.
pub fn estimate_tokens(text: &str) -> u64 {
    let words = text.split_whitespace().count();
    (words as f64 * TOKENS_PER_WORD).round() as u64
}

/// Check if content has at least `min_chars` non-whitespace characters.
pub fn has_meaningful_content(content: &str, min_chars: usize) -> bool {
    content.chars().filter(|c| !c.is_whitespace()).count() >= min_chars.max(1)
}
