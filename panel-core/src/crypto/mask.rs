//! Display masking for secrets that must appear in logs or API responses.

/// Placeholder returned when a value is too short to reveal any of it.
pub const FULL_MASK: &str = "***";

/// Masks a secret for logs and API responses: `first…last` with
/// `visible_chars` characters on each side, or [`FULL_MASK`] when the value
/// is too short for that to hide anything.
pub fn mask_for_display(value: &str, visible_chars: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= visible_chars * 2 {
        return FULL_MASK.to_string();
    }

    let start: String = chars[..visible_chars].iter().collect();
    let end: String = chars[chars.len() - visible_chars..].iter().collect();
    format!("{start}...{end}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_short_values() {
        assert_eq!(mask_for_display("ab", 4), "***");
        assert_eq!(mask_for_display("", 0), "***");
        assert_eq!(mask_for_display("abcdefgh", 4), "***");
    }

    #[test]
    fn test_mask_long_values() {
        assert_eq!(mask_for_display("abcdefghij", 3), "abc...hij");
        assert_eq!(mask_for_display("sk_live_1234567890", 4), "sk_l...7890");
    }

    #[test]
    fn test_mask_counts_characters_not_bytes() {
        assert_eq!(mask_for_display("äöüßäöü", 2), "äö...öü");
    }
}
