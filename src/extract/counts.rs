//! Engagement counter parsing.

use std::sync::LazyLock;

use regex::Regex;

/// A count as shown on the page: digits with optional thousands separators,
/// an optional fraction and an optional K/M/B suffix, followed by the end of
/// input or whitespace ("1.2K", "3M", "1,234 Likes. Like").
static COUNT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d[\d,]*)(?:\.(\d+))?\s*([kmb])?(?:\s|$)").expect("valid count regex")
});

/// Parse the leading count of `raw`, floor-rounded.
///
/// Returns `None` when `raw` does not start with a count.
pub fn parse_count(raw: &str) -> Option<u64> {
    let caps = COUNT_REGEX.captures(raw)?;

    let whole: u64 = caps[1].replace(',', "").parse().ok()?;
    let multiplier: u64 = match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1,
        Some(s) if s == "k" => 1_000,
        Some(s) if s == "m" => 1_000_000,
        Some(_) => 1_000_000_000,
    };

    let mut value = whole.checked_mul(multiplier)?;
    if let Some(fraction) = caps.get(2) {
        // Nine digits is already below the resolution of any multiplier
        let digits = &fraction.as_str()[..fraction.as_str().len().min(9)];
        let numerator: u128 = digits.parse().ok()?;
        let scale = 10u128.pow(digits.len() as u32);
        let part = numerator * multiplier as u128 / scale;
        value = value.checked_add(part as u64)?;
    }

    Some(value)
}

/// Count from an accessibility label first, then the visible text.
/// Anything unreadable counts as zero.
pub fn count_or_zero(aria_label: Option<&str>, text: Option<&str>) -> u64 {
    aria_label
        .and_then(parse_count)
        .or_else(|| text.and_then(parse_count))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviated_counts() {
        assert_eq!(parse_count("1.2K"), Some(1_200));
        assert_eq!(parse_count("3M"), Some(3_000_000));
        assert_eq!(parse_count("842"), Some(842));
        assert_eq!(parse_count("2.5b"), Some(2_500_000_000));
        assert_eq!(parse_count("12.34K"), Some(12_340));
    }

    #[test]
    fn floors_instead_of_rounding() {
        assert_eq!(parse_count("1.9999K"), Some(1_999));
        assert_eq!(parse_count("7.5"), Some(7));
    }

    #[test]
    fn thousands_separators_and_labels() {
        assert_eq!(parse_count("1,234"), Some(1_234));
        assert_eq!(parse_count("1,234 Likes. Like"), Some(1_234));
        assert_eq!(parse_count("  56 replies"), Some(56));
    }

    #[test]
    fn unreadable_counts() {
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_count("Reply"), None);
        assert_eq!(parse_count("1.2Kx"), None);
        assert_eq!(count_or_zero(None, None), 0);
        assert_eq!(count_or_zero(Some("Repost"), Some("")), 0);
        assert_eq!(count_or_zero(Some("Reply"), Some("4")), 4);
        assert_eq!(count_or_zero(Some("9 Replies. Reply"), Some("8")), 9);
    }
}
