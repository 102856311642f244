//! Rendered page snapshots and selector queries over them.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Snapshot of a page after navigation.
#[derive(Debug, Clone, Default)]
pub struct RenderedDocument {
    /// Address the page ended up on after redirects.
    pub final_url: String,
    pub html: String,
    /// Whether one of the ready selectors matched before the deadline.
    pub ready: bool,
    /// JSON bodies of captured background responses.
    pub payloads: Vec<serde_json::Value>,
}

impl RenderedDocument {
    pub fn new(url: &str, html: impl Into<String>) -> Self {
        Self {
            final_url: url.to_string(),
            html: html.into(),
            ready: true,
            payloads: Vec::new(),
        }
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payloads.push(payload);
        self
    }

    /// Parse the HTML for querying.
    pub fn dom(&self) -> DomView {
        DomView {
            html: Html::parse_document(&self.html),
        }
    }
}

/// Parsed DOM with structural selector queries.
pub struct DomView {
    html: Html,
}

impl DomView {
    /// First element matching a CSS selector.
    pub fn first(&self, css: &str) -> Option<ElementRef<'_>> {
        let selector = parse_selector(css)?;
        self.html.select(&selector).next()
    }

    /// All elements matching a CSS selector, in document order.
    pub fn all(&self, css: &str) -> Vec<ElementRef<'_>> {
        match parse_selector(css) {
            Some(selector) => self.html.select(&selector).collect(),
            None => Vec::new(),
        }
    }

    pub fn exists(&self, css: &str) -> bool {
        self.first(css).is_some()
    }

    /// Visible text of the whole body, whitespace-collapsed.
    pub fn body_text(&self) -> String {
        match self.first("body") {
            Some(body) => collapse_whitespace(&body.text().collect::<String>()),
            None => String::new(),
        }
    }
}

/// Parse a selector, logging rather than failing on bad input.
pub(crate) fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            debug!("Invalid selector {:?}: {:?}", css, e);
            None
        }
    }
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
