/// Approximate token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Keeps the leading `max_tokens` worth of text and drops the rest.
/// Deterministic, and never splits a character.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens.saturating_mul(4);
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::{estimate_tokens, truncate_to_tokens};

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn truncation_keeps_prefix_on_char_boundaries() {
        assert_eq!(truncate_to_tokens("abcdefghij", 2), "abcdefgh");
        assert_eq!(truncate_to_tokens("short", 10), "short");
        assert_eq!(truncate_to_tokens("ééééé", 1), "éééé");
        assert!(estimate_tokens(truncate_to_tokens(&"x".repeat(1000), 50)) <= 50);
    }
}
