//! Token-count estimation and title derivation for engine results.

/// Approximate characters per token (conservative heuristic): `ceil(len/4)`.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the number of tokens in `text` using the chars-per-token heuristic.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    ((text.len() + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN) as u64
}

/// Derive a short title from engine output content: the first 47 characters
/// plus an ellipsis when the content is longer than 50, otherwise the
/// content verbatim.
#[must_use]
pub fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= 50 {
        trimmed.to_string()
    } else {
        let truncated: String = trimmed.chars().take(47).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn short_content_is_not_truncated() {
        assert_eq!(derive_title("short title here"), "short title here");
    }

    #[test]
    fn long_content_is_truncated_with_ellipsis() {
        let content = "x".repeat(80);
        let title = derive_title(&content);
        assert_eq!(title.chars().count(), 50);
        assert!(title.ends_with("..."));
    }
}
