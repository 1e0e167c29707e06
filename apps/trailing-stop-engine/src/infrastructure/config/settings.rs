//! Engine Configuration Settings
//!
//! Configuration types for the engine, loaded from environment variables.
//! A broker is enabled by providing its credentials; each enabled broker
//! gets a feed, a trading session and a share of the exit queue.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::SubmissionConfig;
use crate::infrastructure::feed::ReconnectConfig;

/// Kite Connect credentials (Zerodha).
#[derive(Clone)]
pub struct KiteCredentials {
    api_key: String,
    access_token: String,
}

impl KiteCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, access_token: String) -> Self {
        Self {
            api_key,
            access_token,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the session access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for KiteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteCredentials")
            .field("api_key", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Upstox credentials.
#[derive(Clone)]
pub struct UpstoxCredentials {
    access_token: String,
}

impl UpstoxCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(access_token: String) -> Self {
        Self { access_token }
    }

    /// Get the bearer access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for UpstoxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstoxCredentials")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Broker endpoint overrides.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// Kite REST API base URL.
    pub kite_api_url: String,
    /// Kite ticker WebSocket URL (without query).
    pub kite_ws_url: String,
    /// Upstox REST API base URL.
    pub upstox_api_url: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            kite_api_url: "https://api.kite.trade".to_string(),
            kite_ws_url: "wss://ws.kite.trade".to_string(),
            upstox_api_url: "https://api.upstox.com".to_string(),
        }
    }
}

/// Feed reconnection settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Delay before the first reconnection attempt.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Delay multiplier (1.0 = fixed delay).
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_initial: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(5),
            reconnect_delay_multiplier: 1.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

impl FeedSettings {
    /// Reconnect policy configuration for the feed driver.
    #[must_use]
    pub const fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::new(
            self.reconnect_delay_initial,
            self.reconnect_delay_max,
            self.reconnect_delay_multiplier,
            0.0,
            self.max_reconnect_attempts,
        )
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite order database path.
    pub order_db_path: PathBuf,
    /// Zerodha credentials; `None` disables Zerodha.
    pub zerodha: Option<KiteCredentials>,
    /// Upstox credentials; `None` disables Upstox.
    pub upstox: Option<UpstoxCredentials>,
    /// Broker endpoints.
    pub endpoints: EndpointSettings,
    /// Feed reconnection settings.
    pub feed: FeedSettings,
    /// Exit order retry settings.
    pub submission: SubmissionConfig,
    /// Timeout for broker REST calls.
    pub broker_http_timeout: Duration,
    /// Interval between REST price polls while a feed is down (zero = disabled).
    pub price_refresh_interval: Duration,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a broker's credentials are partially set or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a broker's credentials are partially set or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let zerodha = match (
            lookup("ZERODHA_API_KEY"),
            lookup("ZERODHA_ACCESS_TOKEN"),
        ) {
            (None, None) => None,
            (Some(key), Some(token)) => Some(KiteCredentials::new(
                non_empty("ZERODHA_API_KEY", key)?,
                non_empty("ZERODHA_ACCESS_TOKEN", token)?,
            )),
            (Some(_), None) => {
                return Err(ConfigError::MissingEnvVar("ZERODHA_ACCESS_TOKEN".to_string()));
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingEnvVar("ZERODHA_API_KEY".to_string()));
            }
        };

        let upstox = lookup("UPSTOX_ACCESS_TOKEN")
            .map(|token| non_empty("UPSTOX_ACCESS_TOKEN", token).map(UpstoxCredentials::new))
            .transpose()?;

        let defaults = EndpointSettings::default();
        let endpoints = EndpointSettings {
            kite_api_url: lookup("KITE_API_URL").unwrap_or(defaults.kite_api_url),
            kite_ws_url: lookup("KITE_WS_URL").unwrap_or(defaults.kite_ws_url),
            upstox_api_url: lookup("UPSTOX_API_URL").unwrap_or(defaults.upstox_api_url),
        };

        let feed = FeedSettings {
            reconnect_delay_initial: parse_duration_secs(
                &lookup,
                "FEED_RECONNECT_DELAY_SECS",
                FeedSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "FEED_RECONNECT_MAX_DELAY_SECS",
                FeedSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "FEED_RECONNECT_MULTIPLIER",
                FeedSettings::default().reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "FEED_RECONNECT_MAX_ATTEMPTS",
                FeedSettings::default().max_reconnect_attempts,
            ),
        };

        let submission = SubmissionConfig {
            max_attempts: parse_or(
                &lookup,
                "EXIT_SUBMIT_MAX_ATTEMPTS",
                SubmissionConfig::default().max_attempts,
            ),
            retry_delay: parse_duration_millis(
                &lookup,
                "EXIT_SUBMIT_RETRY_DELAY_MS",
                SubmissionConfig::default().retry_delay,
            ),
        };

        Ok(Self {
            order_db_path: lookup("ORDER_DB_PATH")
                .map_or_else(|| PathBuf::from("orders.db"), PathBuf::from),
            zerodha,
            upstox,
            endpoints,
            feed,
            submission,
            broker_http_timeout: parse_duration_secs(
                &lookup,
                "BROKER_HTTP_TIMEOUT_SECS",
                Duration::from_secs(10),
            ),
            price_refresh_interval: parse_duration_secs(
                &lookup,
                "PRICE_REFRESH_INTERVAL_SECS",
                Duration::from_secs(10),
            ),
            metrics_port: parse_or(&lookup, "METRICS_PORT", 0),
        })
    }

    /// Whether at least one broker is configured.
    #[must_use]
    pub const fn has_broker(&self) -> bool {
        self.zerodha.is_some() || self.upstox.is_some()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn non_empty(key: &str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::EmptyValue(key.to_string()))
    } else {
        Ok(value)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
