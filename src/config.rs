//! Configuration file parser for ~/.config/feedhound/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::discovery::{DiscoverySettings, DEFAULT_SEARCH_ENDPOINT};
use crate::feed::{PollSettings, TransportSettings};
use crate::schedule::MovingAverageSchedule;

/// Environment variable that overrides `search_api_key`.
pub const SEARCH_API_KEY_ENV: &str = "FEEDHOUND_SEARCH_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Top-level application configuration.
///
/// Every field has a default, so any subset of keys can be given.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest feed or page body accepted, in bytes.
    pub max_feed_size_bytes: usize,
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,
    /// Polls slower than this get the execution time warning.
    pub execution_warning_secs: u64,
    /// Feeds polled at once.
    pub poll_concurrency: usize,
    /// Sleep between poll rounds in `poll --watch`.
    pub watch_interval_secs: u64,
    /// Idle time after which the next poll resets the schedule.
    pub cold_start_after_hours: u64,
    pub min_interval_minutes: i64,
    pub max_interval_minutes: i64,
    pub discovery_threads: usize,
    pub results_per_query: usize,
    pub search_language: String,
    pub search_endpoint: String,
    /// Search API key. The environment variable takes precedence.
    pub search_api_key: Option<String>,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let transport = TransportSettings::default();
        let poll = PollSettings::default();
        let discovery = DiscoverySettings::default();
        let schedule = MovingAverageSchedule::default();
        Self {
            max_feed_size_bytes: transport.max_body_size,
            request_timeout_secs: transport.timeout.as_secs(),
            execution_warning_secs: poll.execution_warning.as_secs(),
            poll_concurrency: poll.concurrency,
            watch_interval_secs: 60,
            cold_start_after_hours: poll.cold_start_after.as_secs() / 3600,
            min_interval_minutes: schedule.min_interval,
            max_interval_minutes: schedule.max_interval,
            discovery_threads: discovery.threads,
            results_per_query: discovery.results_per_query,
            search_language: discovery.language,
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            search_api_key: None,
            user_agent: transport.user_agent,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("max_feed_size_bytes", &self.max_feed_size_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("execution_warning_secs", &self.execution_warning_secs)
            .field("poll_concurrency", &self.poll_concurrency)
            .field("watch_interval_secs", &self.watch_interval_secs)
            .field("cold_start_after_hours", &self.cold_start_after_hours)
            .field("min_interval_minutes", &self.min_interval_minutes)
            .field("max_interval_minutes", &self.max_interval_minutes)
            .field("discovery_threads", &self.discovery_threads)
            .field("results_per_query", &self.results_per_query)
            .field("search_language", &self.search_language)
            .field("search_endpoint", &self.search_endpoint)
            .field(
                "search_api_key",
                &self.search_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Upper bound for `cold_start_after_hours` (ten years).
    const MAX_COLD_START_HOURS: u64 = 24 * 365 * 10;

    const KNOWN_KEYS: [&'static str; 14] = [
        "max_feed_size_bytes",
        "request_timeout_secs",
        "execution_warning_secs",
        "poll_concurrency",
        "watch_interval_secs",
        "cold_start_after_hours",
        "min_interval_minutes",
        "max_interval_minutes",
        "discovery_threads",
        "results_per_query",
        "search_language",
        "search_endpoint",
        "search_api_key",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
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
                // Deleted between metadata and read
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
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval_minutes < 1 {
            return Err(ConfigError::Invalid(
                "min_interval_minutes must be at least 1".into(),
            ));
        }
        if self.max_interval_minutes < self.min_interval_minutes {
            return Err(ConfigError::Invalid(
                "max_interval_minutes must not be below min_interval_minutes".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".into(),
            ));
        }
        if self.max_feed_size_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_feed_size_bytes must be positive".into(),
            ));
        }
        if self.cold_start_after_hours > Self::MAX_COLD_START_HOURS {
            return Err(ConfigError::Invalid(format!(
                "cold_start_after_hours must not exceed {}",
                Self::MAX_COLD_START_HOURS
            )));
        }
        Ok(())
    }

    /// API key from the environment, falling back to the config file.
    pub fn search_api_key(&self) -> Option<SecretString> {
        std::env::var(SEARCH_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
            .or_else(|| self.search_api_key.clone().map(SecretString::from))
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_body_size: self.max_feed_size_bytes,
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            execution_warning: Duration::from_secs(self.execution_warning_secs),
            cold_start_after: Duration::from_secs(
                self.cold_start_after_hours.saturating_mul(3600),
            ),
            concurrency: self.poll_concurrency.max(1),
        }
    }

    pub fn schedule(&self) -> MovingAverageSchedule {
        MovingAverageSchedule::new(self.min_interval_minutes, self.max_interval_minutes)
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            threads: self.discovery_threads.max(1),
            results_per_query: self.results_per_query,
            language: self.search_language.clone(),
            ..DiscoverySettings::default()
        }
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs.max(1))
    }
}
