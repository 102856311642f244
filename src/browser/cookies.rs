//! Cookie files for logged-in sessions.
//!
//! Accepts the JSON array format exported by common browser extensions
//! (`name`/`key`, `value`, `domain`, `path`, `secure`, `httpOnly`).

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// One cookie to inject into a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CookieSpec {
    #[serde(alias = "key")]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "httpOnly", alias = "http_only")]
    pub http_only: bool,
}

/// Load cookies from a JSON file, skipping entries without name or domain.
pub fn load_cookie_file(path: &Path) -> Result<Vec<CookieSpec>> {
    debug!("Loading cookies from {:?}", path);

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cookie file {}", path.display()))?;
    let raw: Vec<serde_json::Value> = serde_json::from_str(&content)
        .with_context(|| format!("Cookie file {} is not a JSON array", path.display()))?;

    let mut cookies = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<CookieSpec>(value) {
            Ok(cookie) if !cookie.name.is_empty() && !cookie.domain.is_empty() => {
                cookies.push(cookie)
            }
            Ok(cookie) => debug!("Skipping cookie without name or domain: {:?}", cookie.name),
            Err(e) => warn!("Skipping malformed cookie entry: {}", e),
        }
    }

    debug!("Loaded {} cookies", cookies.len());
    Ok(cookies)
}
