//! Chromium sessions over the DevTools protocol (chromiumoxide).
//!
//! One browser process (launched locally or reached over a remote DevTools
//! endpoint) backs the whole run; each session is a page in it. Pages get a
//! realistic user agent, the stealth scripts and any configured cookies
//! before their first navigation.

#[cfg(feature = "browser")]
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
#[cfg(feature = "browser")]
use std::time::Duration;

#[cfg(feature = "browser")]
use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(feature = "browser")]
use tokio::sync::Mutex;
#[cfg(feature = "browser")]
use tokio::task::JoinHandle;
#[cfg(feature = "browser")]
use tokio::time::{timeout_at, Instant};
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventResponseReceived, GetResponseBodyParams, RequestId,
    SetUserAgentOverrideParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::error::CdpError;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::{FutureExt, StreamExt};

use super::config::BrowserEngineConfig;
#[cfg(feature = "browser")]
use super::cookies::{load_cookie_file, CookieSpec};
#[cfg(feature = "browser")]
use super::stealth::STEALTH_SCRIPTS;
use super::{NavigateOptions, RenderedDocument, Session, SessionError, SessionFactory};

/// How often the ready probe runs while waiting for render-complete.
#[cfg(feature = "browser")]
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on the share of the navigation timeout kept for reading the
/// page after the ready wait.
#[cfg(feature = "browser")]
const SNAPSHOT_RESERVE: Duration = Duration::from_secs(5);

/// Launches or connects to Chromium and opens pages as sessions.
#[cfg(feature = "browser")]
pub struct ChromiumSessionFactory {
    browser: Mutex<Option<Browser>>,
    handler: StdMutex<Option<JoinHandle<()>>>,
    config: BrowserEngineConfig,
    cookies: Arc<Vec<CookieSpec>>,
    /// Whether this process launched the browser (and must stop it).
    owns_process: bool,
}

#[cfg(feature = "browser")]
impl ChromiumSessionFactory {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    /// Executable names looked up in PATH.
    const CHROME_COMMANDS: &'static [&'static str] = &[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ];

    /// Start the engine. Must be paired with [`SessionFactory::shutdown`].
    pub async fn launch(config: BrowserEngineConfig) -> Result<Self> {
        let cookies = match config.cookies_file {
            Some(ref path) => load_cookie_file(path)?,
            None => Vec::new(),
        };

        let owns_process = config.remote_url.is_none();
        let (browser, mut handler) = match config.remote_url.clone() {
            Some(url) => Self::connect_remote(&url).await?,
            None => Self::launch_local(&config).await?,
        };

        // Drive the CDP connection until it closes
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler: StdMutex::new(Some(handler_task)),
            config,
            cookies: Arc::new(cookies),
            owns_process,
        })
    }

    fn find_chrome(config: &BrowserEngineConfig) -> Result<std::path::PathBuf> {
        if let Some(ref path) = config.chrome_path {
            if path.exists() {
                return Ok(path.clone());
            }
            warn!("Configured chrome_path {} does not exist", path.display());
        }

        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in Self::CHROME_COMMANDS {
            if let Ok(path) = which::which(cmd) {
                info!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Please install it:\n\
             - Arch/Manjaro: sudo pacman -S chromium\n\
             - Ubuntu/Debian: sudo apt install chromium-browser\n\
             - Fedora: sudo dnf install chromium\n\
             - Or point BROWSER_URL at a running DevTools endpoint"
        ))
    }

    async fn launch_local(
        config: &BrowserEngineConfig,
    ) -> Result<(Browser, chromiumoxide::Handler)> {
        info!("Launching browser (headless={})", config.headless);

        let chrome_path = Self::find_chrome(config)?;
        let (width, height) = config.window_size;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(width, height);

        // with_head means NOT headless
        if !config.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--lang=en-US")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &config.chrome_args {
            builder = builder.arg(arg.clone());
        }

        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")
    }

    /// Connect to a remote Chrome instance via its `/json/version` endpoint.
    async fn connect_remote(url: &str) -> Result<(Browser, chromiumoxide::Handler)> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

        debug!("Connecting to WebSocket: {}", ws_url);
        Browser::connect(ws_url)
            .await
            .context("Failed to connect to remote browser")
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    type Session = ChromiumSession;

    async fn create(&self) -> Result<ChromiumSession, SessionError> {
        let page = {
            let guard = self.browser.lock().await;
            let browser = guard
                .as_ref()
                .ok_or_else(|| SessionError::Fatal("browser has been shut down".to_string()))?;
            browser.new_page("about:blank").await.map_err(fatal)?
        };

        let session = ChromiumSession { page };
        session.prepare(&self.config, &self.cookies).await?;
        Ok(session)
    }

    async fn shutdown(&self) {
        if let Some(mut browser) = self.browser.lock().await.take() {
            if self.owns_process {
                info!("Closing browser");
                if let Err(e) = browser.close().await {
                    debug!("Browser close command failed: {}", e);
                }
                if let Err(e) = browser.wait().await {
                    debug!("Waiting for browser exit failed: {}", e);
                }
            }
        }

        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handler {
            handle.abort();
        }
    }
}

/// One Chromium page.
#[cfg(feature = "browser")]
pub struct ChromiumSession {
    page: Page,
}

#[cfg(feature = "browser")]
impl ChromiumSession {
    async fn prepare(
        &self,
        config: &BrowserEngineConfig,
        cookies: &[CookieSpec],
    ) -> Result<(), SessionError> {
        self.page
            .execute(SetUserAgentOverrideParams::new(config.user_agent.clone()))
            .await
            .map_err(fatal)?;

        if config.stealth {
            for script in STEALTH_SCRIPTS {
                let params = AddScriptToEvaluateOnNewDocumentParams::new(script.to_string());
                if let Err(e) = self.page.execute(params).await {
                    debug!("Stealth script registration skipped: {}", e);
                }
            }
        }

        if !cookies.is_empty() {
            let params: Vec<CookieParam> = cookies
                .iter()
                .filter_map(|c| {
                    let mut builder = CookieParam::builder()
                        .name(c.name.clone())
                        .value(c.value.clone())
                        .domain(c.domain.clone())
                        .secure(c.secure)
                        .http_only(c.http_only);
                    if let Some(ref path) = c.path {
                        builder = builder.path(path.clone());
                    }
                    match builder.build() {
                        Ok(param) => Some(param),
                        Err(e) => {
                            warn!("Failed to build cookie {}: {}", c.name, e);
                            None
                        }
                    }
                })
                .collect();
            if let Err(e) = self.page.set_cookies(params).await {
                warn!("Failed to set session cookies: {}", e);
            }
        }

        Ok(())
    }

    /// Poll the ready probe until it passes or the deadline is reached.
    async fn wait_until_ready(&self, probe: &str, deadline: Instant) -> bool {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }

            match tokio::time::timeout(remaining, self.page.evaluate(probe.to_string())).await {
                Ok(Ok(result)) => {
                    if result.into_value::<bool>().unwrap_or(false) {
                        return true;
                    }
                }
                Ok(Err(e)) => debug!("Ready probe failed: {}", e),
                Err(_) => return false,
            }

            tokio::time::sleep(READY_POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn read_body(
        &self,
        request_id: RequestId,
        deadline: Instant,
    ) -> Option<serde_json::Value> {
        let request = self.page.execute(GetResponseBodyParams::new(request_id));
        let Ok(response) = timeout_at(deadline, request).await else {
            debug!("Reading captured response body timed out");
            return None;
        };
        match response {
            Ok(resp) if !resp.result.base64_encoded => {
                match serde_json::from_str(&resp.result.body) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        debug!("Captured response is not JSON: {}", e);
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Could not read captured response body: {}", e);
                None
            }
        }
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl Session for ChromiumSession {
    async fn navigate(
        &mut self,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<RenderedDocument, SessionError> {
        let deadline = Instant::now() + options.timeout;

        // Listener must exist before navigation so early responses are seen
        let mut responses = match options.capture_responses_matching {
            Some(_) => Some(
                self.page
                    .event_listener::<EventResponseReceived>()
                    .await
                    .map_err(fatal)?,
            ),
            None => None,
        };

        debug!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| SessionError::Fatal(format!("invalid URL {}: {}", url, e)))?;

        let nav = timeout_at(deadline, self.page.execute(nav_params))
            .await
            .map_err(|_| SessionError::Timeout(options.timeout))?
            .map_err(|e| classify(e, options.timeout))?;

        if let Some(ref error_text) = nav.result.error_text {
            return Err(SessionError::Fatal(format!(
                "navigation to {} failed: {}",
                url, error_text
            )));
        }

        let probe = ready_probe_script(&options.ready_selectors);
        let ready_by = ready_deadline(deadline, options.timeout);
        let ready = self.wait_until_ready(&probe, ready_by).await;
        if !ready {
            debug!("Ready markers not seen for {} before deadline", url);
        }

        let html = timeout_at(deadline, self.page.content())
            .await
            .map_err(|_| SessionError::Timeout(options.timeout))?
            .map_err(fatal)?;
        let final_url = timeout_at(deadline, self.page.url())
            .await
            .ok()
            .and_then(Result::ok)
            .flatten()
            .unwrap_or_else(|| url.to_string());

        let mut payloads = Vec::new();
        if let (Some(stream), Some(marker)) = (
            responses.as_mut(),
            options.capture_responses_matching.as_deref(),
        ) {
            let mut request_ids = Vec::new();
            while let Some(Some(event)) = stream.next().now_or_never() {
                if event.response.url.contains(marker) {
                    request_ids.push(event.request_id.clone());
                }
            }
            for request_id in request_ids {
                if let Some(body) = self.read_body(request_id, deadline).await {
                    payloads.push(body);
                }
            }
            debug!("Captured {} payload(s) for {}", payloads.len(), url);
        }

        Ok(RenderedDocument {
            final_url,
            html,
            ready,
            payloads,
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.page.clone().close().await {
            debug!("Page close failed: {}", e);
        }
    }
}

#[cfg(feature = "browser")]
fn fatal(e: CdpError) -> SessionError {
    SessionError::Fatal(e.to_string())
}

#[cfg(feature = "browser")]
fn classify(e: CdpError, timeout: Duration) -> SessionError {
    match e {
        CdpError::Timeout => SessionError::Timeout(timeout),
        other => fatal(other),
    }
}

/// End of the ready wait: the navigation deadline minus the part of the
/// timeout kept for reading the snapshot.
#[cfg(feature = "browser")]
fn ready_deadline(deadline: Instant, timeout: Duration) -> Instant {
    deadline - (timeout / 5).min(SNAPSHOT_RESERVE)
}

/// JavaScript that returns true once any selector matches, or once the
/// document has loaded when no selectors are given.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
fn ready_probe_script(selectors: &[String]) -> String {
    if selectors.is_empty() {
        return "document.readyState === 'complete'".to_string();
    }
    let list = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        "(() => {{ const sels = {}; return sels.some((s) => {{ try {{ return document.querySelector(s) !== null; }} catch (e) {{ return false; }} }}); }})()",
        list
    )
}

// Stubs for when browser feature is disabled

#[cfg(not(feature = "browser"))]
pub struct ChromiumSessionFactory;

#[cfg(not(feature = "browser"))]
impl ChromiumSessionFactory {
    pub async fn launch(_config: BrowserEngineConfig) -> Result<Self> {
        Err(anyhow::anyhow!(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
        ))
    }
}

#[cfg(not(feature = "browser"))]
pub struct ChromiumSession;

#[cfg(not(feature = "browser"))]
#[async_trait]
impl Session for ChromiumSession {
    async fn navigate(
        &mut self,
        _url: &str,
        _options: &NavigateOptions,
    ) -> Result<RenderedDocument, SessionError> {
        Err(SessionError::Fatal("browser support not compiled".to_string()))
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    type Session = ChromiumSession;

    async fn create(&self) -> Result<ChromiumSession, SessionError> {
        Err(SessionError::Fatal("browser support not compiled".to_string()))
    }
}
