use std::{borrow::Cow, sync::OnceLock};

use regex::Regex;

/// Collapses runs of whitespace (including non-breaking spaces) to one space and trims the ends.
pub fn remove_excess_whitespace(s: &str) -> Cow<'_, str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[\s\u{00A0}]{2,}|[\t\n\r\u{00A0}]").expect("regex should be valid"));
    let trimmed = s.trim_matches(|c: char| c.is_whitespace() || c == '\u{00A0}');
    re.replace_all(trimmed, " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_runs() {
        assert_eq!(remove_excess_whitespace("  In \n\t stock  "), "In stock");
        assert_eq!(remove_excess_whitespace("a\u{00A0}b"), "a b");
        assert!(matches!(remove_excess_whitespace("plain"), Cow::Borrowed("plain")));
    }
}
