//! Browser engine configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default user agent presented by browser sessions.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Browser engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    pub proxy: Option<String>,

    /// JSON cookie file injected into every session before navigation.
    pub cookies_file: Option<PathBuf>,

    /// Apply automation-fingerprint evasion scripts (default: true).
    pub stealth: bool,

    /// User agent override.
    pub user_agent: String,

    /// Window size as (width, height).
    pub window_size: (u32, u32),

    /// Additional Chrome arguments.
    pub chrome_args: Vec<String>,

    /// Explicit Chrome/Chromium executable.
    pub chrome_path: Option<PathBuf>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    pub remote_url: Option<String>,
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            cookies_file: None,
            stealth: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_size: (1920, 1080),
            chrome_args: Vec::new(),
            chrome_path: None,
            remote_url: None,
        }
    }
}

impl BrowserEngineConfig {
    /// Apply overrides from environment variables.
    ///
    /// - `BROWSER_URL` - Remote DevTools endpoint
    /// - `SOCKS_PROXY` - Proxy server for browser traffic
    /// - `CHROME_PATH` - Browser executable
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = non_empty_env("BROWSER_URL") {
            self.remote_url = Some(url);
        }
        if let Some(proxy) = non_empty_env("SOCKS_PROXY") {
            self.proxy = Some(proxy);
        }
        if let Some(path) = non_empty_env("CHROME_PATH") {
            self.chrome_path = Some(PathBuf::from(path));
        }
        self
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
