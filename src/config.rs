use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Upstream transit provider settings
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Polling intervals for the background refresh jobs
    #[serde(default)]
    pub sync: SyncConfig,
    /// Optional remote key-value cache base URL. Omit to run memory-only.
    #[serde(default)]
    pub remote_cache_url: Option<String>,
    /// Address the HTTP server binds to
    #[serde(default = "Config::default_bind_addr")]
    pub bind_addr: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
}

impl Config {
    fn default_bind_addr() -> String {
        "0.0.0.0:3000".to_string()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            sync: SyncConfig::default(),
            remote_cache_url: None,
            bind_addr: Self::default_bind_addr(),
            cors_origins: Vec::new(),
            cors_permissive: false,
        }
    }
}

/// Connection settings for the upstream transit JSON:API.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the provider (default: the MBTA v3 API)
    #[serde(default = "UpstreamConfig::default_base_url")]
    pub base_url: String,
    /// Optional API key, sent as a query parameter
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            api_key: None,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl UpstreamConfig {
    fn default_base_url() -> String {
        "https://api-v3.mbta.com".to_string()
    }
}

/// Sliding-window rate limit plus minimum request spacing.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window (default: 1000)
    #[serde(default = "RateLimitConfig::default_max_requests")]
    pub max_requests: u32,
    /// Window length in seconds (default: 60)
    #[serde(default = "RateLimitConfig::default_window_secs")]
    pub window_secs: u64,
    /// Minimum spacing between any two requests in milliseconds (default: 60)
    #[serde(default = "RateLimitConfig::default_min_spacing_ms")]
    pub min_spacing_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: Self::default_max_requests(),
            window_secs: Self::default_window_secs(),
            min_spacing_ms: Self::default_min_spacing_ms(),
        }
    }
}

impl RateLimitConfig {
    fn default_max_requests() -> u32 {
        1000
    }
    fn default_window_secs() -> u64 {
        60
    }
    fn default_min_spacing_ms() -> u64 {
        60
    }
}

/// Retry policy for transient upstream failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3)
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay in milliseconds, doubled each retry (default: 250)
    #[serde(default = "RetryConfig::default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Backoff cap in milliseconds (default: 8000)
    #[serde(default = "RetryConfig::default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            base_backoff_ms: Self::default_base_backoff_ms(),
            max_backoff_ms: Self::default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    fn default_max_retries() -> u32 {
        3
    }
    fn default_base_backoff_ms() -> u64 {
        250
    }
    fn default_max_backoff_ms() -> u64 {
        8000
    }
}

/// Intervals for the background polling jobs, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Static tier: routes, lines, stops, trips, shapes (default: 3600)
    #[serde(default = "SyncConfig::default_static_interval_secs")]
    pub static_interval_secs: u64,
    /// Vehicle positions (default: 15)
    #[serde(default = "SyncConfig::default_vehicles_interval_secs")]
    pub vehicles_interval_secs: u64,
    /// Predictions pool (default: 30)
    #[serde(default = "SyncConfig::default_predictions_interval_secs")]
    pub predictions_interval_secs: u64,
    /// Service alerts (default: 60)
    #[serde(default = "SyncConfig::default_alerts_interval_secs")]
    pub alerts_interval_secs: u64,
    /// Pause between per-route sub-fetches, to stay inside the client's
    /// rate budget (default: 50)
    #[serde(default = "SyncConfig::default_route_chunk_delay_ms")]
    pub route_chunk_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            static_interval_secs: Self::default_static_interval_secs(),
            vehicles_interval_secs: Self::default_vehicles_interval_secs(),
            predictions_interval_secs: Self::default_predictions_interval_secs(),
            alerts_interval_secs: Self::default_alerts_interval_secs(),
            route_chunk_delay_ms: Self::default_route_chunk_delay_ms(),
        }
    }
}

impl SyncConfig {
    fn default_static_interval_secs() -> u64 {
        3600
    }
    fn default_vehicles_interval_secs() -> u64 {
        15
    }
    fn default_predictions_interval_secs() -> u64 {
        30
    }
    fn default_alerts_interval_secs() -> u64 {
        60
    }
    fn default_route_chunk_delay_ms() -> u64 {
        50
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
