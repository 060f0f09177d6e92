//! Application configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;
use url::Url;

use crate::{
    connection::{ReconnectPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY},
    errors::FeedError,
    normalizer::{Normalizer, DEFAULT_OFFLINE_AFTER, DEFAULT_STALE_AFTER},
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TOKEN_ENV: &str = "VESSELFEED_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub feed: FeedConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FeedConfig {
    /// Socket endpoint, `ws://` or `wss://`
    pub url: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_base_delay")]
    pub reconnect_base_delay: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_max_delay")]
    pub max_reconnect_delay: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Report age after which a vessel without stated connectivity is stale
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_stale_after")]
    pub stale_after: Duration,
    /// Report age after which it is offline
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_offline_after")]
    pub offline_after: Duration,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CredentialsConfig {
    /// Environment variable holding the access token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// File holding the access token, preferred over `token_env`
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

fn default_base_delay() -> Duration {
    DEFAULT_BASE_DELAY
}

fn default_max_delay() -> Duration {
    DEFAULT_MAX_DELAY
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_stale_after() -> Duration {
    DEFAULT_STALE_AFTER
}

fn default_offline_after() -> Duration {
    DEFAULT_OFFLINE_AFTER
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            token_file: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(File::with_name("config/default").required(false))
    }

    /// Load from an explicit file, still honouring environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::build(File::from(path).required(true))
    }

    fn build(file: impl config::Source + Send + Sync + 'static) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("VESSELFEED")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl FeedConfig {
    /// Configuration with default timings for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_base_delay: DEFAULT_BASE_DELAY,
            max_reconnect_delay: DEFAULT_MAX_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stale_after: DEFAULT_STALE_AFTER,
            offline_after: DEFAULT_OFFLINE_AFTER,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), FeedError> {
        self.endpoint()?;
        self.validate_delays()?;
        self.validate_thresholds()?;
        Ok(())
    }

    /// Parsed socket endpoint, without credentials.
    pub fn endpoint(&self) -> Result<Url, FeedError> {
        if self.url.trim().is_empty() {
            return Err(FeedError::ConfigurationError {
                message: "Feed URL cannot be empty".to_string(),
            });
        }
        let url = Url::parse(self.url.trim())?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(FeedError::ConfigurationError {
                message: format!("Feed URL must use ws or wss, got {}", other),
            }),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.reconnect_base_delay,
            max_delay: self.max_reconnect_delay,
        }
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.stale_after, self.offline_after)
    }

    fn validate_delays(&self) -> Result<(), FeedError> {
        if self.reconnect_base_delay.is_zero() {
            return Err(FeedError::ConfigurationError {
                message: "Reconnect base delay must be greater than zero".to_string(),
            });
        }
        if self.max_reconnect_delay < self.reconnect_base_delay {
            return Err(FeedError::ConfigurationError {
                message: "Maximum reconnect delay cannot be below the base delay".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(FeedError::ConfigurationError {
                message: "Connect timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    fn validate_thresholds(&self) -> Result<(), FeedError> {
        if self.offline_after < self.stale_after {
            return Err(FeedError::ConfigurationError {
                message: "offline_after cannot be shorter than stale_after".to_string(),
            });
        }
        Ok(())
    }
}
