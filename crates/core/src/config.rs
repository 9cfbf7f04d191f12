// crates/core/src/config.rs
//! Export orchestrator configuration.
//!
//! Resolution order is defaults, then an optional TOML file, then
//! environment variables. Durations are written in milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:47900";

/// Poll cadence and retry policy for the progress poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Interval used right after submission.
    #[serde(with = "millis", rename = "fast_interval_ms")]
    pub fast_interval: Duration,
    /// Interval used once `slow_after` has elapsed.
    #[serde(with = "millis", rename = "slow_interval_ms")]
    pub slow_interval: Duration,
    #[serde(with = "millis", rename = "slow_after_ms")]
    pub slow_after: Duration,
    /// Consecutive transient poll failures tolerated before giving up.
    pub retry_budget: u32,
    #[serde(with = "millis", rename = "retry_base_delay_ms")]
    pub retry_base_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(2),
            slow_interval: Duration::from_secs(5),
            slow_after: Duration::from_secs(30),
            retry_budget: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl PollConfig {
    /// Regular polling interval given the time elapsed since submission.
    pub fn interval_at(&self, elapsed: Duration) -> Duration {
        if elapsed >= self.slow_after {
            self.slow_interval
        } else {
            self.fast_interval
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.retry_base_delay.saturating_mul(1u32 << exp)
    }
}

/// Top-level configuration for talking to the render service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub base_url: String,
    #[serde(with = "millis", rename = "request_timeout_ms")]
    pub request_timeout: Duration,
    pub poll: PollConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            request_timeout: Duration::from_secs(30),
            poll: PollConfig::default(),
        }
    }
}

impl ExportConfig {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SUBTITLER_*` environment overrides on top of `self`.
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = get("SUBTITLER_RENDER_URL") {
            self.base_url = url;
        }
        if let Some(n) = get("SUBTITLER_RETRY_BUDGET").and_then(|v| v.parse().ok()) {
            self.poll.retry_budget = n;
        }
        if let Some(ms) = get("SUBTITLER_POLL_FAST_MS").and_then(|v| v.parse().ok()) {
            self.poll.fast_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = get("SUBTITLER_POLL_SLOW_MS").and_then(|v| v.parse().ok()) {
            self.poll.slow_interval = Duration::from_millis(ms);
        }
        self
    }

    /// Reject settings that would make the poller spin or never start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }
        reqwest::Url::parse(url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if self.poll.fast_interval.is_zero() || self.poll.slow_interval.is_zero() {
            return Err(ConfigError::InvalidPolling("intervals must be non-zero".into()));
        }
        if self.poll.retry_base_delay.is_zero() {
            return Err(ConfigError::InvalidPolling("retry delay must be non-zero".into()));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
