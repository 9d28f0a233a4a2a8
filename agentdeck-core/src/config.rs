use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::error::DeckError;

/// Prefix for environment overrides, e.g. `AGENTDECK__API__BASE_URL`.
pub const ENV_PREFIX: &str = "AGENTDECK";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AgentDeckConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    /// 0 disables the timeout for streaming requests.
    pub stream_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_seconds: 30,
            stream_timeout_seconds: 0,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        (self.stream_timeout_seconds > 0).then(|| Duration::from_secs(self.stream_timeout_seconds))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub health_interval_seconds: u64,
    pub trace_refresh_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            health_interval_seconds: 30,
            trace_refresh_seconds: 5,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_limit: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { default_limit: 20 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl AgentDeckConfig {
    /// Load from an optional TOML file, then apply `AGENTDECK__*` env overrides.
    pub fn load(path: &str) -> Result<Self, DeckError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DeckError> {
        if self.api.base_url.trim().is_empty() {
            return Err(invalid("api.base_url must not be empty"));
        }
        if self.api.timeout_seconds == 0 {
            return Err(invalid("api.timeout_seconds must be > 0"));
        }
        if self.pagination.default_limit == 0 {
            return Err(invalid("pagination.default_limit must be > 0"));
        }
        if self.polling.health_interval_seconds == 0 || self.polling.trace_refresh_seconds == 0 {
            return Err(invalid("polling intervals must be > 0"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> DeckError {
    DeckError::Config(ConfigError::Message(message.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================
