//! Post records and failure entries produced by the scrape pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::links::CanonicalUrl;

/// Date format used in the output table.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Metadata extracted from a single post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub url: CanonicalUrl,
    pub text: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub comment_count: u64,
    pub like_count: u64,
    pub share_count: u64,
}

impl PostRecord {
    /// Timestamp in the fixed output format.
    pub fn formatted_date(&self) -> String {
        self.created_at.format(DATE_FORMAT).to_string()
    }
}

/// Why a URL could not be turned into a [`PostRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No session became available within the acquire timeout.
    PoolExhausted,
    /// The page did not load or render within the navigation timeout.
    NavigationTimeout,
    /// Deleted, private, suspended or age-restricted post.
    ContentNotFound,
    /// Login wall, captcha or rate-limit interstitial.
    ChallengeDetected,
    /// The page rendered but its markup was not recognised.
    UnexpectedStructure,
    /// The session died and no replacement could finish the fetch.
    SessionFatal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PoolExhausted => "PoolExhausted",
            FailureKind::NavigationTimeout => "NavigationTimeout",
            FailureKind::ContentNotFound => "ContentNotFound",
            FailureKind::ChallengeDetected => "ChallengeDetected",
            FailureKind::UnexpectedStructure => "UnexpectedStructure",
            FailureKind::SessionFatal => "SessionFatal",
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            FailureKind::ContentNotFound | FailureKind::UnexpectedStructure
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A URL that could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub url: CanonicalUrl,
    pub kind: FailureKind,
    pub message: Option<String>,
}

/// Terminal result of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded(PostRecord),
    Failed(FailureEntry),
}

impl Outcome {
    pub fn url(&self) -> &CanonicalUrl {
        match self {
            Outcome::Succeeded(record) => &record.url,
            Outcome::Failed(entry) => &entry.url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }
}
