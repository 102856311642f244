//! Post metadata extraction from a rendered page.
//!
//! The session records `TweetResultByRestId` responses while the page loads.
//! When one describes the post it is the primary source; the rendered
//! article is the fallback. Pages with neither are classified by their
//! markers into a [`FailureKind`].

mod counts;
mod markup;
mod payload;

pub use counts::{count_or_zero, parse_count};

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::browser::{NavigateOptions, RenderedDocument, Session, SessionError};
use crate::links::CanonicalUrl;
use crate::models::{FailureKind, PostRecord};

/// Background request whose JSON response carries the post.
pub const PAYLOAD_MARKER: &str = "TweetResultByRestId";

/// Legacy API timestamp layout, e.g. `Wed Oct 10 20:19:24 +0000 2018`.
const LEGACY_TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("{kind}: {message}")]
    Failure { kind: FailureKind, message: String },
    /// The session cannot be used again.
    #[error("session failure: {0}")]
    SessionFatal(String),
}

impl ExtractError {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        ExtractError::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractError::Failure { kind, .. } => *kind,
            ExtractError::SessionFatal(_) => FailureKind::SessionFatal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ExtractError::Failure { message, .. } => message,
            ExtractError::SessionFatal(message) => message,
        }
    }
}

/// Turns one canonical URL into a [`PostRecord`] using a browser session.
#[derive(Debug, Clone)]
pub struct Extractor {
    options: NavigateOptions,
}

impl Extractor {
    pub fn new(navigation_timeout: Duration) -> Self {
        let mut options = NavigateOptions::new(navigation_timeout);
        options.ready_selectors = markup::ready_selectors();
        options.capture_responses_matching = Some(PAYLOAD_MARKER.to_string());
        Self { options }
    }

    pub async fn extract<S>(
        &self,
        session: &mut S,
        url: &CanonicalUrl,
    ) -> Result<PostRecord, ExtractError>
    where
        S: Session + ?Sized,
    {
        let document = match session.navigate(&url.to_string(), &self.options).await {
            Ok(document) => document,
            Err(SessionError::Timeout(after)) => {
                return Err(ExtractError::failure(
                    FailureKind::NavigationTimeout,
                    format!("page did not load within {}s", after.as_secs()),
                ))
            }
            Err(SessionError::Fatal(message)) => return Err(ExtractError::SessionFatal(message)),
        };
        parse(&document, url)
    }
}

/// Classify a rendered page and read the post from it.
pub fn parse(document: &RenderedDocument, url: &CanonicalUrl) -> Result<PostRecord, ExtractError> {
    let dom = document.dom();
    let dom_post = markup::find_post(&dom, url.id());

    match payload::find(&document.payloads, url.id()) {
        Some(payload::PayloadOutcome::Post(post)) => {
            debug!("Read {} from captured payload", url);
            let username = post
                .screen_name
                .or_else(|| dom_post.and_then(|p| p.username))
                .unwrap_or_else(|| url.handle().to_string());
            return Ok(PostRecord {
                url: url.clone(),
                text: post.text,
                username,
                created_at: post.created_at,
                comment_count: post.reply_count,
                like_count: post.like_count,
                share_count: post.retweet_count,
            });
        }
        Some(payload::PayloadOutcome::Unavailable(reason)) => {
            return Err(ExtractError::failure(FailureKind::ContentNotFound, reason));
        }
        None => {}
    }

    if let Some(post) = dom_post {
        let created_at = post.created_at.ok_or_else(|| {
            ExtractError::failure(
                FailureKind::UnexpectedStructure,
                "post article has no readable timestamp",
            )
        })?;
        debug!("Read {} from rendered article", url);
        return Ok(PostRecord {
            url: url.clone(),
            text: post.text,
            username: post.username.unwrap_or_else(|| url.handle().to_string()),
            created_at,
            comment_count: post.reply_count,
            like_count: post.like_count,
            share_count: post.retweet_count,
        });
    }

    if markup::is_login_redirect(&document.final_url) {
        return Err(ExtractError::failure(
            FailureKind::ChallengeDetected,
            format!("redirected to {}", document.final_url),
        ));
    }
    let body_text = markup::normalized_body_text(&dom);
    if let Some(marker) = markup::challenge_marker(&dom, &body_text) {
        return Err(ExtractError::failure(FailureKind::ChallengeDetected, marker));
    }
    if let Some(marker) = markup::not_found_marker(&dom, &body_text) {
        return Err(ExtractError::failure(FailureKind::ContentNotFound, marker));
    }
    if !document.ready {
        return Err(ExtractError::failure(
            FailureKind::NavigationTimeout,
            "page never reached a known state",
        ));
    }
    Err(ExtractError::failure(
        FailureKind::UnexpectedStructure,
        "no post article or known page-state marker",
    ))
}

/// Parse an RFC 3339 or legacy API timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
