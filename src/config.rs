//! Run configuration.
//!
//! Settings come from defaults, then an optional TOML file, then environment
//! variables. Command-line flags are applied on top by the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::browser::{BrowserEngineConfig, PoolConfig};
use crate::services::scrape::{RetryPolicy, ScrapeConfig};
use crate::sink::{OrderPolicy, SinkOptions};

/// Config file picked up from the working directory when present.
pub const CONFIG_FILENAME: &str = "postharvest.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {name}: {message}")]
    Invalid { name: String, message: String },
}

impl ConfigError {
    fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Extra attempts for transient failures (0 = no retries).
    pub max_retries: u32,
    /// Base backoff in milliseconds, doubled per retry.
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 2000,
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum concurrent browser sessions.
    pub max_concurrency: usize,
    /// Per-URL load and render timeout in seconds.
    pub navigation_timeout_secs: u64,
    /// How long a task waits for a free session, in seconds.
    pub acquire_timeout_secs: u64,
    /// Wind-down time for in-flight tasks after Ctrl-C, in seconds.
    pub grace_period_secs: u64,
    /// Intermediate artifact of canonical links.
    pub links_path: PathBuf,
    /// Output table.
    pub output_path: PathBuf,
    /// Optional failure log.
    pub failures_path: Option<PathBuf>,
    /// Output field delimiter (single ASCII character).
    pub delimiter: char,
    /// Prepend a `Link` column to the output.
    pub include_link: bool,
    /// Output row order.
    pub order: OrderPolicy,
    pub retry: RetrySettings,
    pub browser: BrowserEngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            navigation_timeout_secs: 30,
            acquire_timeout_secs: 120,
            grace_period_secs: 10,
            links_path: PathBuf::from("cleaned_links.txt"),
            output_path: PathBuf::from("posts.csv"),
            failures_path: None,
            delimiter: ',',
            include_link: false,
            order: OrderPolicy::Input,
            retry: RetrySettings::default(),
            browser: BrowserEngineConfig::default(),
        }
    }
}

impl Settings {
    /// Load from `path`, or from `postharvest.toml` in the working directory
    /// if it exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => Self::load_from_path(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILENAME);
                if default_path.is_file() {
                    Self::load_from_path(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.with_env_overrides()
    }

    /// Parse a TOML config file. Missing keys keep their defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from environment variables.
    ///
    /// - `POSTHARVEST_MAX_CONCURRENCY`
    /// - `POSTHARVEST_NAVIGATION_TIMEOUT` - seconds
    /// - `POSTHARVEST_OUTPUT` - output table path
    /// - `POSTHARVEST_MAX_RETRIES`
    /// - `BROWSER_URL`, `SOCKS_PROXY`, `CHROME_PATH` - see [`BrowserEngineConfig`]
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = parse_env("POSTHARVEST_MAX_CONCURRENCY")? {
            self.max_concurrency = value;
        }
        if let Some(value) = parse_env("POSTHARVEST_NAVIGATION_TIMEOUT")? {
            self.navigation_timeout_secs = value;
        }
        if let Some(value) = non_empty_env("POSTHARVEST_OUTPUT") {
            self.output_path = PathBuf::from(value);
        }
        if let Some(value) = parse_env("POSTHARVEST_MAX_RETRIES")? {
            self.retry.max_retries = value;
        }
        self.browser = self.browser.with_env_overrides();
        Ok(self)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid("max_concurrency", "must be at least 1"));
        }
        for (name, value) in [
            ("navigation_timeout_secs", self.navigation_timeout_secs),
            ("acquire_timeout_secs", self.acquire_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(name, "must be greater than 0"));
            }
        }
        if !self.delimiter.is_ascii() || self.delimiter == '"' || self.delimiter == '\n' {
            return Err(ConfigError::invalid(
                "delimiter",
                format!("{:?} is not usable as a single-byte delimiter", self.delimiter),
            ));
        }
        Ok(())
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_sessions: self.max_concurrency,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }

    pub fn scrape_config(&self) -> ScrapeConfig {
        ScrapeConfig {
            max_concurrency: self.max_concurrency,
            retry: RetryPolicy::new(
                self.retry.max_retries,
                Duration::from_millis(self.retry.base_delay_ms),
            ),
            grace_period: Duration::from_secs(self.grace_period_secs),
        }
    }

    /// Sink options. Call after [`Settings::validate`].
    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            output_path: self.output_path.clone(),
            failures_path: self.failures_path.clone(),
            delimiter: u8::try_from(self.delimiter).unwrap_or(b','),
            include_link: self.include_link,
            order: self.order,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match non_empty_env(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid(name, format!("cannot parse {:?}", raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that modify environment variables must be serialized
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_concurrency, 5);
        assert_eq!(settings.navigation_timeout(), Duration::from_secs(30));
        assert_eq!(settings.sink_options().delimiter, b',');
        assert_eq!(settings.scrape_config().retry.max_retries, 0);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postharvest.toml");
        std::fs::write(
            &path,
            r#"
            max_concurrency = 3
            delimiter = ";"
            include_link = true
            order = "completion"

            [retry]
            max_retries = 2

            [browser]
            headless = false
            "#,
        )
        .unwrap();

        let settings = Settings::load_from_path(&path).unwrap();
        assert_eq!(settings.max_concurrency, 3);
        assert_eq!(settings.delimiter, ';');
        assert_eq!(settings.order, OrderPolicy::Completion);
        assert_eq!(settings.retry.max_retries, 2);
        assert_eq!(settings.retry.base_delay_ms, 2000);
        assert!(!settings.browser.headless);
        assert_eq!(settings.navigation_timeout_secs, 30);

        let sink = settings.sink_options();
        assert_eq!(sink.delimiter, b';');
        assert!(sink.include_link);
    }

    #[test]
    fn unreadable_or_malformed_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Settings::load_from_path(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "max_concurrency = \"many\"").unwrap();
        assert!(matches!(
            Settings::load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let mut settings = Settings {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.max_concurrency = 1;
        settings.navigation_timeout_secs = 0;
        assert!(settings.validate().is_err());

        settings.navigation_timeout_secs = 1;
        settings.delimiter = 'é';
        assert!(settings.validate().is_err());

        settings.delimiter = '\t';
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();

        std::env::set_var("POSTHARVEST_MAX_CONCURRENCY", "8");
        std::env::set_var("POSTHARVEST_OUTPUT", "out/posts.csv");
        let settings = Settings::default().with_env_overrides().unwrap();
        assert_eq!(settings.max_concurrency, 8);
        assert_eq!(settings.output_path, PathBuf::from("out/posts.csv"));

        std::env::set_var("POSTHARVEST_MAX_CONCURRENCY", "lots");
        assert!(matches!(
            Settings::default().with_env_overrides(),
            Err(ConfigError::Invalid { .. })
        ));

        std::env::remove_var("POSTHARVEST_MAX_CONCURRENCY");
        std::env::remove_var("POSTHARVEST_OUTPUT");
    }
}
