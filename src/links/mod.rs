//! Post link validation and normalization.
//!
//! Input lines are scanned for candidate links; each candidate is checked
//! against the post URL shape (`/<handle>/status/<id>` on a known host) and
//! reduced to a single canonical form so that surface variants of the same
//! post collapse into one entry.

mod artifact;

pub use artifact::{read_lines, write_links};

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;
use url::Url;

use crate::utils::truncate_display;

/// Host used in canonical URLs.
pub const CANONICAL_HOST: &str = "x.com";

/// Hosts recognised as aliases of the canonical host.
const HOST_ALIASES: &[&str] = &[
    "x.com",
    "www.x.com",
    "mobile.x.com",
    "twitter.com",
    "www.twitter.com",
    "mobile.twitter.com",
];

/// Maximum handle length allowed by the platform.
pub const MAX_HANDLE_LEN: usize = 15;

/// Candidate link finder. Stops at whitespace and CSV/quote delimiters.
static CANDIDATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhttps?://[^\s,;"'<>\[\]{}|\\^`]+"#).expect("candidate regex should compile")
});

/// Canonical post URL: `https://x.com/<handle>/status/<id>`.
///
/// Identity is the lowercased handle plus the id. The handle as first
/// written is kept for display.
#[derive(Debug, Clone)]
pub struct CanonicalUrl {
    username: String,
    handle: String,
    id: u64,
}

impl CanonicalUrl {
    /// Build from already-validated parts.
    pub fn new(handle: &str, id: u64) -> Self {
        Self {
            username: handle.to_ascii_lowercase(),
            handle: handle.to_string(),
            id,
        }
    }

    /// Lowercased handle used in the canonical form.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Handle with the case it had in the input.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> (&str, u64) {
        (&self.username, self.id)
    }
}

impl PartialEq for CanonicalUrl {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for CanonicalUrl {}

impl Hash for CanonicalUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for CanonicalUrl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalUrl {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "https://{}/{}/status/{}",
            CANONICAL_HOST, self.username, self.id
        )
    }
}

/// Error returned when a string is not a post URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a post URL: {0}")]
pub struct NotAPostUrl(pub String);

impl FromStr for CanonicalUrl {
    type Err = NotAPostUrl;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        canonicalize(s).ok_or_else(|| NotAPostUrl(s.to_string()))
    }
}

impl Serialize for CanonicalUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CanonicalUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Check a single candidate link and return its canonical form.
///
/// Query strings, fragments and a trailing slash are ignored. Anything else
/// beyond `/<handle>/status/<id>` is rejected.
pub fn canonicalize(candidate: &str) -> Option<CanonicalUrl> {
    let trimmed = candidate
        .trim()
        .trim_end_matches(|c| matches!(c, '.' | ')' | ']' | '!' | '>'));
    let url = Url::parse(trimmed).ok()?;

    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let host = url.host_str()?.to_ascii_lowercase();
    if !HOST_ALIASES.contains(&host.as_str()) {
        return None;
    }

    let mut segments: Vec<&str> = url.path_segments()?.collect();
    if segments.last() == Some(&"") {
        segments.pop();
    }

    let [handle, marker, id] = segments.as_slice() else {
        return None;
    };

    if !matches!(*marker, "status" | "statuses") || !is_valid_handle(handle) {
        return None;
    }

    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = id.parse::<u64>().ok()?;

    Some(CanonicalUrl::new(handle, id))
}

fn is_valid_handle(handle: &str) -> bool {
    (1..=MAX_HANDLE_LEN).contains(&handle.len())
        && handle
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Outcome of validating a batch of input lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Canonical URLs in first-seen order, deduplicated.
    pub accepted: Vec<CanonicalUrl>,
    /// Non-blank lines read.
    pub lines_read: usize,
    /// Non-blank lines that held no valid post link.
    pub rejected: usize,
    /// Valid links dropped because an equal canonical form was already seen.
    pub duplicates: usize,
}

/// Stateful validator that deduplicates across everything it is fed.
#[derive(Debug, Default)]
pub struct LinkValidator {
    seen: HashSet<CanonicalUrl>,
    report: ValidationReport,
}

impl LinkValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate one input line. A line may hold several links (e.g. a CSV row).
    pub fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        self.report.lines_read += 1;

        let mut valid_in_line = 0usize;
        for candidate in CANDIDATE_REGEX.find_iter(line) {
            let Some(url) = canonicalize(candidate.as_str()) else {
                continue;
            };
            valid_in_line += 1;

            if self.seen.insert(url.clone()) {
                self.report.accepted.push(url);
            } else {
                debug!("Duplicate post link: {}", url);
                self.report.duplicates += 1;
            }
        }

        if valid_in_line == 0 {
            debug!("Rejected line: {}", truncate_display(line, 80));
            self.report.rejected += 1;
        }
    }

    pub fn finish(self) -> ValidationReport {
        self.report
    }
}

/// Validate a sequence of lines in one go.
pub fn validate_lines<I, S>(lines: I) -> ValidationReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut validator = LinkValidator::new();
    for line in lines {
        validator.push_line(line.as_ref());
    }
    validator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_shape() {
        let url = canonicalize("https://x.com/alice/status/111").unwrap();
        assert_eq!(url.to_string(), "https://x.com/alice/status/111");
        assert_eq!(url.username(), "alice");
        assert_eq!(url.id(), 111);
    }

    #[test]
    fn identity_ignores_handle_case() {
        let upper = canonicalize("https://x.com/Alice/status/111").unwrap();
        let lower = canonicalize("https://x.com/alice/status/111").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.handle(), "Alice");
        assert_eq!(upper.to_string(), "https://x.com/alice/status/111");

        let report = validate_lines([
            "https://x.com/Alice/status/111",
            "https://x.com/alice/status/111",
        ]);
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.accepted[0].handle(), "Alice");
    }

    #[test]
    fn normalizes_aliases_and_surface_variants() {
        let expected = "https://x.com/some_user/status/1850000000000000000";
        for candidate in [
            "https://twitter.com/Some_User/status/1850000000000000000",
            "http://www.x.com/some_user/status/1850000000000000000/",
            "https://mobile.twitter.com/some_user/statuses/1850000000000000000",
            "https://x.com/some_user/status/1850000000000000000?s=20&t=abc",
            "https://x.com/some_user/status/1850000000000000000#reply",
            "https://x.com/some_user/status/1850000000000000000.",
        ] {
            assert_eq!(
                canonicalize(candidate).map(|u| u.to_string()).as_deref(),
                Some(expected),
                "candidate: {}",
                candidate
            );
        }
    }

    #[test]
    fn rejects_malformed_links() {
        for candidate in [
            "not a link",
            "https://example.com/alice/status/111",
            "https://x.com.evil.net/alice/status/111",
            "https://x.com/alice/status/",
            "https://x.com/alice/status",
            "https://x.com/alice/status/12ab",
            "https://x.com/alice/likes/111",
            "https://x.com/alice/status/111/photo/1",
            "https://x.com/this_handle_is_too_long/status/111",
            "https://x.com/bad-handle/status/111",
            "ftp://x.com/alice/status/111",
            "https://x.com/alice/status/99999999999999999999999",
        ] {
            assert!(canonicalize(candidate).is_none(), "accepted: {}", candidate);
        }
    }

    #[test]
    fn deduplicates_surface_forms() {
        let report = validate_lines([
            "https://x.com/alice/status/111",
            "https://x.com/alice/status/111/",
            "https://x.com/alice/status/111?s=46",
        ]);
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.rejected, 0);
    }

    #[test]
    fn scenario_lines() {
        let report = validate_lines([
            "https://x.com/alice/status/111",
            "not a link",
            "https://x.com/bob/status/222/",
        ]);
        let urls: Vec<String> = report.accepted.iter().map(|u| u.to_string()).collect();
        assert_eq!(
            urls,
            vec![
                "https://x.com/alice/status/111",
                "https://x.com/bob/status/222"
            ]
        );
        assert_eq!(report.rejected, 1);
        assert_eq!(report.lines_read, 3);
    }

    #[test]
    fn reads_links_embedded_in_rows() {
        let report = validate_lines([
            r#""https://x.com/alice/status/1","https://twitter.com/bob/status/2""#,
            "see https://x.com/carol/status/3; thanks",
            "",
            "   ",
        ]);
        assert_eq!(report.accepted.len(), 3);
        assert_eq!(report.lines_read, 2);
        assert_eq!(report.rejected, 0);
    }

    #[test]
    fn serde_uses_canonical_string() {
        let url = CanonicalUrl::new("Alice", 7);
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, "\"https://x.com/alice/status/7\"");
        let back: CanonicalUrl = serde_json::from_str(&json).unwrap();
        assert_eq!(back, url);
    }
}
