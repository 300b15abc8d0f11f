use std::borrow::Cow;

/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Returns the first `n` characters as a Cow<str>, avoiding allocation if possible.
pub fn first_n_chars_lossy(s: &str, n: usize) -> Cow<'_, str> {
    if s.chars().count() <= n {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(prefix_chars(s, n).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_respects_char_boundaries() {
        assert_eq!(prefix_chars("héllo", 2), "hé");
        assert_eq!(prefix_chars("hi", 10), "hi");
    }

    #[test]
    fn lossy_prefix_borrows_when_short() {
        assert!(matches!(first_n_chars_lossy("short", 10), Cow::Borrowed(_)));
        assert_eq!(first_n_chars_lossy("longer text", 6), "longer");
    }
}
