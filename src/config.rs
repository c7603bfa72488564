//! Configuration file parser for ~/.config/relwatch/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
//! [`Config::validate`] must pass before the watcher starts.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::feed::DEFAULT_USER_AGENT;
use crate::storage::validate_term;

/// Environment variable that overrides `webhook_url`.
pub const WEBHOOK_ENV_VAR: &str = "RELWATCH_WEBHOOK_URL";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but is not usable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level watcher configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// SEC-015: Custom Debug impl masks `webhook_url`, which embeds an access token.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed endpoint; `rss=1&search=<term>` is appended per request.
    pub feed_url: String,

    /// Search terms tracked independently, checked in this order.
    pub terms: Vec<String>,

    /// Minutes between polls.
    pub poll_interval_minutes: u64,

    /// Directory holding one `<term>.json` snapshot per term.
    /// Defaults to `lists/` next to the config file.
    pub storage_dir: Option<PathBuf>,

    /// User-Agent header sent with feed requests.
    pub user_agent: String,

    /// Per-request timeout for feed fetches.
    pub request_timeout_secs: u64,

    /// Whether a term's first snapshot announces every entry it lists.
    pub announce_on_first_run: bool,

    /// Chat webhook for announcements. Env var takes precedence.
    /// Without one, announcements go to standard output.
    pub webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "https://predb.me/".to_string(),
            terms: vec!["NSW-BigBlueBox".to_string(), "NSW-HR".to_string()],
            poll_interval_minutes: 10,
            storage_dir: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            announce_on_first_run: true,
            webhook_url: None,
        }
    }
}

/// SEC-015: Mask webhook_url in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("feed_url", &self.feed_url)
            .field("terms", &self.terms)
            .field("poll_interval_minutes", &self.poll_interval_minutes)
            .field("storage_dir", &self.storage_dir)
            .field("user_agent", &self.user_agent)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("announce_on_first_run", &self.announce_on_first_run)
            .field(
                "webhook_url",
                &self.webhook_url.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "feed_url",
        "terms",
        "poll_interval_minutes",
        "storage_dir",
        "user_agent",
        "request_timeout_secs",
        "announce_on_first_run",
        "webhook_url",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// Does not validate; call [`Config::validate`] afterwards.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            terms = config.terms.len(),
            interval_minutes = config.poll_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply `RELWATCH_WEBHOOK_URL` from the environment when set and non-empty.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(WEBHOOK_ENV_VAR) {
            if !url.trim().is_empty() {
                self.webhook_url = Some(url);
            }
        }
    }

    /// Check that every value is usable before the watcher starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;

        if self.terms.is_empty() {
            return Err(ConfigError::Invalid("no terms to track".to_string()));
        }
        for term in &self.terms {
            validate_term(term).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.poll_interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(webhook) = &self.webhook_url {
            // Never echo the URL itself
            let ok = Url::parse(webhook)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !ok {
                return Err(ConfigError::Invalid(
                    "webhook_url must be an http(s) URL".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Parsed feed endpoint.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.feed_url)
            .map_err(|e| ConfigError::Invalid(format!("feed_url {:?}: {e}", self.feed_url)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ConfigError::Invalid(format!(
                "feed_url scheme {scheme:?} not supported (only http/https)"
            ))),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes.saturating_mul(60))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Snapshot directory, falling back to `<config_dir>/lists`.
    pub fn storage_dir_or(&self, config_dir: &Path) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| config_dir.join("lists"))
    }
}

// ============================================================================
// Tests
// ============================================================================
