//! Relay Configuration Settings
//!
//! Configuration types for the price relay, loaded from environment variables.

use std::time::Duration;

use url::Url;

use crate::application::services::{BackoffConfig, PollConfig, PriceCacheConfig};
use crate::domain::pricing::SymbolSet;

/// Default upstream price backend.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3001";

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Gateway and realtime HTTP port.
    pub http_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            health_port: 8082,
        }
    }
}

/// Upstream backend settings used by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    /// Base URL of the price backend.
    pub url: Url,
    /// Hard timeout for one upstream request.
    pub timeout: Duration,
    /// `max-age` advertised on successful gateway responses.
    pub cache_max_age: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            timeout: Duration::from_millis(8_000),
            cache_max_age: Duration::from_secs(2),
        }
    }
}

#[allow(clippy::expect_used)]
fn default_backend_url() -> Url {
    Url::parse(DEFAULT_BACKEND_URL).expect("default backend URL is valid")
}

/// Price cache and polling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Whether poll loops run.
    pub poll_enabled: bool,
    /// Retries after a failed fetch.
    pub retry_count: u32,
    /// Delay before the first retry.
    pub retry_base_delay: Duration,
    /// Cap on any retry delay.
    pub retry_max_delay: Duration,
    /// How long an unobserved entry survives.
    pub retention: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            poll_enabled: true,
            retry_count: 2,
            retry_base_delay: Duration::from_millis(1_000),
            retry_max_delay: Duration::from_millis(10_000),
            retention: Duration::from_secs(60),
        }
    }
}

impl CacheSettings {
    /// Retry schedule for failed fetches.
    #[must_use]
    pub const fn retry_backoff(&self) -> BackoffConfig {
        BackoffConfig::retry(self.retry_count, self.retry_base_delay, self.retry_max_delay)
    }
}

/// Realtime hub, feeder and client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeSettings {
    /// Capacity of the update broadcast channel.
    pub capacity: usize,
    /// Time between feeder polls.
    pub feed_interval: Duration,
    /// Symbols fed even when no client subscribed to them.
    pub feed_symbols: Option<SymbolSet>,
    /// Another relay's `/realtime` endpoint to consume pushed prices from.
    pub upstream_url: Option<Url>,
    /// Initial reconnect delay for the upstream realtime client.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnect delay for the upstream realtime client.
    pub reconnect_delay_max: Duration,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            feed_interval: Duration::from_millis(10_000),
            feed_symbols: None,
            upstream_url: None,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
        }
    }
}

impl RealtimeSettings {
    /// Cache configuration for the feeder: entries go stale after half the
    /// feed interval.
    #[must_use]
    pub const fn feed_cache_config(&self, cache: &CacheSettings) -> PriceCacheConfig {
        PriceCacheConfig {
            poll_interval: self.feed_interval,
            retention: cache.retention,
            retry: cache.retry_backoff(),
        }
    }

    /// Poll configuration for the feeder. A server has no visibility, so it
    /// always polls.
    #[must_use]
    pub const fn feed_poll_config(&self, cache: &CacheSettings) -> PollConfig {
        PollConfig {
            enabled: cache.poll_enabled,
            interval: self.feed_interval,
            poll_in_background: true,
        }
    }

    /// Reconnect schedule of the upstream realtime client.
    #[must_use]
    pub const fn reconnect_backoff(&self) -> BackoffConfig {
        BackoffConfig::reconnect(self.reconnect_delay_initial, self.reconnect_delay_max)
    }
}

/// Service key for the live-prices function.
#[derive(Clone, PartialEq, Eq)]
pub struct FunctionKey(String);

impl FunctionKey {
    /// Wrap a key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// The raw key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for FunctionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FunctionKey([REDACTED])")
    }
}

/// Live-prices function settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSettings {
    /// Functions base URL; the relay calls `{url}/get-live-prices`.
    pub url: Url,
    /// Bearer key sent with each invocation.
    pub key: Option<FunctionKey>,
}

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelayConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream backend settings.
    pub backend: BackendSettings,
    /// Cache and polling settings.
    pub cache: CacheSettings,
    /// Realtime settings.
    pub realtime: RealtimeSettings,
    /// Live-prices function, used as the feeder's source when present.
    pub function: Option<FunctionSettings>,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL or symbol list is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            http_port: parse_env_u16("PRICE_RELAY_HTTP_PORT", server_defaults.http_port),
            health_port: parse_env_u16("PRICE_RELAY_HEALTH_PORT", server_defaults.health_port),
        };

        let backend_defaults = BackendSettings::default();
        let backend = BackendSettings {
            url: parse_env_url("PRICE_BACKEND_URL")?.unwrap_or(backend_defaults.url),
            timeout: parse_env_duration_millis(
                "PRICE_BACKEND_TIMEOUT_MS",
                backend_defaults.timeout,
            ),
            cache_max_age: parse_env_duration_secs(
                "PRICE_CACHE_MAX_AGE_SECS",
                backend_defaults.cache_max_age,
            ),
        };

        let cache_defaults = CacheSettings::default();
        let cache = CacheSettings {
            poll_enabled: parse_env_bool("PRICE_POLL_ENABLED", cache_defaults.poll_enabled),
            retry_count: parse_env_u32("PRICE_RETRY_COUNT", cache_defaults.retry_count),
            retry_base_delay: parse_env_duration_millis(
                "PRICE_RETRY_BASE_DELAY_MS",
                cache_defaults.retry_base_delay,
            ),
            retry_max_delay: parse_env_duration_millis(
                "PRICE_RETRY_MAX_DELAY_MS",
                cache_defaults.retry_max_delay,
            ),
            retention: parse_env_duration_secs(
                "PRICE_CACHE_RETENTION_SECS",
                cache_defaults.retention,
            ),
        };

        let realtime_defaults = RealtimeSettings::default();
        let realtime = RealtimeSettings {
            capacity: parse_env_usize("PRICE_REALTIME_CAPACITY", realtime_defaults.capacity),
            feed_interval: parse_env_duration_millis(
                "PRICE_FEED_INTERVAL_MS",
                realtime_defaults.feed_interval,
            ),
            feed_symbols: parse_env_symbols("PRICE_FEED_SYMBOLS")?,
            upstream_url: parse_env_url("PRICE_REALTIME_UPSTREAM_URL")?,
            reconnect_delay_initial: parse_env_duration_millis(
                "PRICE_RECONNECT_DELAY_INITIAL_MS",
                realtime_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_millis(
                "PRICE_RECONNECT_DELAY_MAX_MS",
                realtime_defaults.reconnect_delay_max,
            ),
        };

        let function = parse_env_url("PRICE_FUNCTIONS_URL")?.map(|url| FunctionSettings {
            url,
            key: non_empty_env("PRICE_FUNCTIONS_KEY").map(FunctionKey::new),
        });

        Ok(Self {
            server,
            backend,
            cache,
            realtime,
            function,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds an unparseable URL.
    #[error("environment variable {key} is not a valid URL: {source}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Parse failure.
        source: url::ParseError,
    },
    /// Environment variable holds a malformed symbol list.
    #[error("environment variable {key} is not a valid symbol list: {reason}")]
    InvalidSymbols {
        /// Variable name.
        key: String,
        /// Why the list was rejected.
        reason: String,
    },
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env_url(key: &str) -> Result<Option<Url>, ConfigError> {
    non_empty_env(key)
        .map(|raw| {
            Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
}

fn parse_env_symbols(key: &str) -> Result<Option<SymbolSet>, ConfigError> {
    non_empty_env(key)
        .map(|raw| {
            SymbolSet::parse_csv(&raw).map_err(|e| ConfigError::InvalidSymbols {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_settings_defaults() {
        let settings = ServerSettings::default();
        assert_eq!(settings.http_port, 8080);
        assert_eq!(settings.health_port, 8082);
    }

    #[test]
    fn backend_settings_defaults() {
        let settings = BackendSettings::default();
        assert_eq!(settings.url.as_str(), "http://localhost:3001/");
        assert_eq!(settings.timeout, Duration::from_millis(8_000));
        assert_eq!(settings.cache_max_age, Duration::from_secs(2));
    }

    #[test]
    fn cache_settings_retry_schedule() {
        let retry = CacheSettings::default().retry_backoff();
        assert_eq!(retry.max_retries, Some(2));
        assert_eq!(retry.delay_for(5), Duration::from_millis(10_000));
    }

    #[test]
    fn realtime_settings_defaults() {
        let settings = RealtimeSettings::default();
        assert_eq!(settings.capacity, 10_000);
        assert_eq!(settings.feed_interval, Duration::from_millis(10_000));
        assert!(settings.feed_symbols.is_none());
        assert!(settings.upstream_url.is_none());
    }

    #[test]
    fn feed_configs_follow_feed_interval() {
        let realtime = RealtimeSettings::default();
        let cache = CacheSettings::default();

        let cache_config = realtime.feed_cache_config(&cache);
        assert_eq!(cache_config.stale_after(), Duration::from_millis(5_000));
        assert_eq!(cache_config.retention, cache.retention);

        assert_eq!(cache_config.retry, cache.retry_backoff());

        let poll = realtime.feed_poll_config(&cache);
        assert!(poll.enabled);
        assert!(poll.poll_in_background);
        assert_eq!(poll.interval, Duration::from_millis(10_000));

        let disabled = CacheSettings {
            poll_enabled: false,
            ..CacheSettings::default()
        };
        assert!(!realtime.feed_poll_config(&disabled).enabled);

        let backoff = realtime.reconnect_backoff();
        assert_eq!(backoff.base_delay, Duration::from_millis(500));
        assert!(backoff.max_retries.is_none());
    }

    #[test]
    fn function_key_redacted_debug() {
        let key = FunctionKey::new("service-role-secret".to_string());
        let debug = format!("{key:?}");
        assert!(!debug.contains("service-role-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
