//! Browser session layer.
//!
//! The pipeline talks to the rendering engine only through the [`Session`]
//! and [`SessionFactory`] traits: a session navigates to one URL at a time
//! and hands back the rendered document. The chromium implementation lives in
//! `chromium`; tests plug in their own factories.

mod chromium;
mod config;
mod cookies;
mod document;
mod pool;
mod stealth;

pub use chromium::{ChromiumSession, ChromiumSessionFactory};
pub use config::BrowserEngineConfig;
pub use cookies::{load_cookie_file, CookieSpec};
pub use document::{DomView, RenderedDocument};
pub(crate) use document::{collapse_whitespace, parse_selector};
pub use pool::{PoolConfig, PoolError, PoolStats, PooledSession, SessionPool};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a session while navigating.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Navigation did not complete within the allotted time.
    #[error("navigation timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The session is unusable (crashed renderer, closed target, navigation
    /// exception). The pool must not hand it out again.
    #[error("session failure: {0}")]
    Fatal(String),
}

/// What a navigation waits for and captures.
#[derive(Debug, Clone)]
pub struct NavigateOptions {
    /// Upper bound for loading plus rendering.
    pub timeout: Duration,
    /// The page counts as rendered once any of these CSS selectors matches.
    pub ready_selectors: Vec<String>,
    /// Capture JSON bodies of background responses whose URL contains this.
    pub capture_responses_matching: Option<String>,
}

impl NavigateOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ready_selectors: Vec::new(),
            capture_responses_matching: None,
        }
    }
}

/// One browser page able to render a single URL at a time.
#[async_trait]
pub trait Session: Send {
    /// Navigate to `url` and return the rendered document.
    async fn navigate(
        &mut self,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<RenderedDocument, SessionError>;

    /// Release engine resources held by this session.
    async fn close(&mut self) {}
}

/// Creates sessions on demand for the [`SessionPool`].
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session + 'static;

    async fn create(&self) -> Result<Self::Session, SessionError>;

    /// Tear down the engine behind the sessions. Called once at end of run.
    async fn shutdown(&self) {}
}
