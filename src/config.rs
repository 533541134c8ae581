//! Guidance client configuration
//!
//! Defaults match the in-store simulator. Every value can be overridden
//! from the environment with [`GuidanceConfig::from_env`].

use std::{env, time::Duration};

use tracing::{info, warn};

use crate::core::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_ROLE};
use crate::error::ConfigError;

/// Default positioning service endpoint (override with COMPASS_WS env var)
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8765/ws";

/// How long a locate request may go unanswered before the simulator is
/// reported as unavailable
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Clone, Debug, PartialEq)]
pub struct GuidanceConfig {
    /// WebSocket address of the positioning service
    pub endpoint: String,
    /// Role announced in the init handshake and in every command frame
    pub role: String,
    pub liveness_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl GuidanceConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            role: DEFAULT_ROLE.to_string(),
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Load from COMPASS_* environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            endpoint: var("COMPASS_WS").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            role: var("COMPASS_ROLE").unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            liveness_timeout: try_load_ms("COMPASS_LIVENESS_MS", DEFAULT_LIVENESS_TIMEOUT)?,
            backoff_base: try_load_ms("COMPASS_BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE)?,
            backoff_max: try_load_ms("COMPASS_BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rest = self
            .endpoint
            .strip_prefix("ws://")
            .or_else(|| self.endpoint.strip_prefix("wss://"))
            .ok_or_else(|| ConfigError::InvalidEndpoint(self.endpoint.clone()))?;
        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }

        if self.liveness_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration("liveness_timeout"));
        }
        if self.backoff_base.is_zero() {
            return Err(ConfigError::InvalidDuration("backoff_base"));
        }
        if self.backoff_max < self.backoff_base {
            return Err(ConfigError::BackoffRange {
                base_ms: self.backoff_base.as_millis() as u64,
                max_ms: self.backoff_max.as_millis() as u64,
            });
        }
        Ok(())
    }
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WS_URL)
    }
}

fn var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => {
            info!("{key} not set, using default");
            None
        }
    }
}

fn try_load_ms(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let Some(raw) = var(key) else {
        return Ok(default);
    };
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Unparsable { key, value: raw }
        })
}
