//! Configuration types for fetching, the worker pool and sessions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::address::NormalizationPolicy;
use crate::errors::HarvestError;

/// Configuration for HTTP fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-address timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// Maximum number of redirects to follow.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Maximum response size in bytes.
    #[serde(default = "default_max_size")]
    pub max_response_size: usize,
    /// Additional headers to include.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_timeout() -> f64 {
    10.0
}

fn default_max_redirects() -> usize {
    10
}

fn default_user_agent() -> String {
    concat!(
        "linkharvest/",
        env!("CARGO_PKG_VERSION"),
        " (+https://github.com/linkharvest/linkharvest-rust)"
    )
    .to_string()
}

fn default_max_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            max_response_size: default_max_size(),
            headers: HashMap::new(),
        }
    }
}

impl FetchConfig {
    /// Creates a new fetch configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the response size cap in bytes.
    #[must_use]
    pub fn with_max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }
}

/// Configuration for the bounded fetch pool and progress reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrent fetches.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Number of progress boundaries per batch (5 means every 20%).
    #[serde(default = "default_progress_steps")]
    pub progress_steps: usize,
    /// Capacity of the per-batch event channel.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism().map_or(8, |n| n.get().max(1))
}

fn default_progress_steps() -> usize {
    5
}

fn default_progress_buffer() -> usize {
    32
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            progress_steps: default_progress_steps(),
            progress_buffer: default_progress_buffer(),
        }
    }
}

impl PoolConfig {
    /// Sets the worker budget.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets the progress channel capacity.
    #[must_use]
    pub fn with_progress_buffer(mut self, capacity: usize) -> Self {
        self.progress_buffer = capacity;
        self
    }
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds of inactivity after which a session may be evicted.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: f64,
    /// Seconds between reaper sweeps; half the idle timeout when unset.
    #[serde(default)]
    pub sweep_interval_seconds: Option<f64>,
}

fn default_idle_timeout() -> f64 {
    3600.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout(),
            sweep_interval_seconds: None,
        }
    }
}

impl SessionConfig {
    /// Sets the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, seconds: f64) -> Self {
        self.idle_timeout_seconds = seconds;
        self
    }

    /// Sets an explicit sweep interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, seconds: f64) -> Self {
        self.sweep_interval_seconds = Some(seconds);
        self
    }

    /// Idle timeout as Duration.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.idle_timeout_seconds)
    }

    /// Sweep cadence as Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        let seconds = self
            .sweep_interval_seconds
            .unwrap_or(self.idle_timeout_seconds / 2.0);
        Duration::from_secs_f64(seconds)
    }
}

/// Combined configuration for the harvester.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Fetch configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,
    /// Link normalization policy.
    #[serde(default)]
    pub normalization: NormalizationPolicy,
}

impl HarvestConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, HarvestError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HarvestError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Sets the fetch configuration.
    #[must_use]
    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// Sets the pool configuration.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the session configuration.
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Sets the normalization policy.
    #[must_use]
    pub fn with_normalization(mut self, policy: NormalizationPolicy) -> Self {
        self.normalization = policy;
        self
    }

    /// Checks that every knob is usable.
    pub fn validate(&self) -> Result<(), HarvestError> {
        check_seconds("fetch.timeout_seconds", self.fetch.timeout_seconds)?;
        if self.fetch.user_agent.trim().is_empty() {
            return Err(HarvestError::config("fetch.user_agent must not be empty"));
        }
        if self.pool.max_workers == 0 {
            return Err(HarvestError::config("pool.max_workers must be at least 1"));
        }
        if self.pool.progress_steps == 0 {
            return Err(HarvestError::config("pool.progress_steps must be at least 1"));
        }
        if self.pool.progress_buffer == 0 {
            return Err(HarvestError::config("pool.progress_buffer must be at least 1"));
        }
        check_seconds("session.idle_timeout_seconds", self.session.idle_timeout_seconds)?;
        if let Some(interval) = self.session.sweep_interval_seconds {
            check_seconds("session.sweep_interval_seconds", interval)?;
        }
        Ok(())
    }
}

/// Seconds must be positive and representable as a [`Duration`].
pub(crate) fn check_seconds(name: &str, seconds: f64) -> Result<(), HarvestError> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) if !duration.is_zero() => Ok(()),
        Ok(_) => Err(HarvestError::config(format!("{name} must be positive"))),
        Err(err) => Err(HarvestError::config(format!(
            "{name} is not a usable duration ({seconds}): {err}"
        ))),
    }
}
