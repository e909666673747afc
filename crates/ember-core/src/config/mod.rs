//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations of each section
//! 2. **Config file**: TOML file named by the `EMBER_CONFIG` env var
//! 3. **Environment variables**: `EMBER__*` variables override single fields
//!
//! # Configuration Sections
//!
//! - [`EndpointSettings`]: upstream endpoints to register at startup
//! - [`HealthConfig`]: probe schedule and failover/recovery thresholds
//! - [`FailoverSettings`]: retry policy of the direct request path
//! - [`BatchSettings`]: batch coalescer sizing, timing and rate limit
//! - [`HttpConfig`]: HTTP transport concurrency
//! - [`LoggingConfig`], [`MetricsConfig`]
//!
//! # Example
//!
//! ```toml
//! [[endpoints]]
//! id = "helius-main"
//! url = "https://mainnet.helius-rpc.com"
//! api_key = "YOUR_KEY"
//! transport_kind = "standard"
//! priority = 10
//!
//! [[endpoints]]
//! id = "helius-das"
//! url = "https://mainnet.helius-rpc.com"
//! transport_kind = "das"
//!
//! [batch]
//! max_batch_size = 50
//! rate_per_second = 25
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, time::Duration};

use crate::{
    batch::BatchConfig,
    types::TransportKind,
    upstream::{
        EndpointConfig, FailoverConfig, HealthMonitorConfig, HealthPolicy, HttpClientConfig,
    },
};

/// One endpoint entry of the `endpoints` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointSettings {
    /// Unique identifier used in stats, metrics and events.
    pub id: String,

    /// Base URL. Must start with `http` or `https`.
    pub url: String,

    /// Appended as the `api-key` query parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub transport_kind: TransportKind,

    /// Weighted-random share among the top candidates. Defaults to `1`.
    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default)]
    pub rate_limit: u32,

    /// Higher is preferred; `0` never reclaims primary through recovery.
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub staked: bool,

    #[serde(default)]
    pub region: String,
}

fn default_weight() -> u32 {
    1
}

impl EndpointSettings {
    /// Registration parameters for the endpoint registry.
    #[must_use]
    pub fn to_endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            transport_kind: self.transport_kind,
            weight: self.weight,
            rate_limit: self.rate_limit,
            priority: self.priority,
            staked: self.staked,
            region: self.region.clone(),
        }
    }
}

/// Health probing and primary reassignment thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between probe cycles. Defaults to `30`.
    pub interval_seconds: u64,

    /// Cheap JSON-RPC method used as a probe. Defaults to `getBlockHeight`.
    pub probe_method: String,

    pub probe_timeout_ms: u64,

    /// Consecutive failures before a primary fails over. Defaults to `3`.
    pub failover_threshold: u32,

    /// Consecutive successes before an endpoint may reclaim primary. Defaults to `2`.
    pub recovery_threshold: u32,

    pub degraded_threshold_ms: u64,

    /// Challenger latency must be at most this fraction of the primary's. Defaults to `0.8`.
    pub recovery_latency_ratio: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            probe_method: "getBlockHeight".to_string(),
            probe_timeout_ms: 5000,
            failover_threshold: 3,
            recovery_threshold: 2,
            degraded_threshold_ms: 1000,
            recovery_latency_ratio: 0.8,
        }
    }
}

/// Retry policy of the failover client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FailoverSettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub request_timeout_ms: u64,
    pub default_kind: TransportKind,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 100,
            backoff_multiplier: 2.0,
            request_timeout_ms: 10_000,
            default_kind: TransportKind::Standard,
        }
    }
}

/// Batch coalescer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_pending_requests: usize,
    pub max_retries: u32,
    /// Retry delays; the last one repeats once exhausted.
    pub backoff_ms: Vec<u64>,
    /// Deadline of a queued call from enqueue to completion.
    pub request_timeout_ms: u64,
    /// Deadline of one wire-level batch call.
    pub wire_timeout_ms: u64,
    pub dedupe_ttl_ms: u64,
    pub rate_per_second: f64,
    pub bucket_capacity: u32,
    /// Send every batch to this URL instead of a selected endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    /// Endpoint kind selected for batches when `endpoint_url` is unset.
    pub transport_kind: TransportKind,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            batch_delay_ms: 10,
            max_pending_requests: 10_000,
            max_retries: 3,
            backoff_ms: vec![100, 200, 300, 500, 800],
            request_timeout_ms: 30_000,
            wire_timeout_ms: 10_000,
            dedupe_ttl_ms: 5000,
            rate_per_second: 50.0,
            bucket_capacity: 100,
            endpoint_url: None,
            transport_kind: TransportKind::Standard,
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub concurrent_limit: usize,
    pub connect_timeout_ms: u64,
    pub permit_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let defaults = HttpClientConfig::default();
        Self {
            concurrent_limit: defaults.concurrent_limit,
            connect_timeout_ms: defaults.connect_timeout_ms,
            permit_timeout_ms: defaults.permit_timeout_ms,
        }
    }
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder. Defaults to `true`.
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Root application configuration.
///
/// Environment overrides use the `EMBER` prefix and `__` as separator, e.g.
/// `EMBER__BATCH__MAX_BATCH_SIZE=50`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoints: Vec<EndpointSettings>,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub failover: FailoverSettings,

    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let health = HealthConfig::default();
        let failover = FailoverSettings::default();
        let batch = BatchSettings::default();
        let http = HttpConfig::default();

        let config_builder = Config::builder()
            .set_default("health.interval_seconds", health.interval_seconds)?
            .set_default("health.probe_method", health.probe_method)?
            .set_default("health.probe_timeout_ms", health.probe_timeout_ms)?
            .set_default("health.failover_threshold", u64::from(health.failover_threshold))?
            .set_default("health.recovery_threshold", u64::from(health.recovery_threshold))?
            .set_default("health.degraded_threshold_ms", health.degraded_threshold_ms)?
            .set_default("health.recovery_latency_ratio", health.recovery_latency_ratio)?
            .set_default("failover.max_retries", u64::from(failover.max_retries))?
            .set_default("failover.retry_delay_ms", failover.retry_delay_ms)?
            .set_default("failover.backoff_multiplier", failover.backoff_multiplier)?
            .set_default("failover.request_timeout_ms", failover.request_timeout_ms)?
            .set_default("failover.default_kind", failover.default_kind.as_str())?
            .set_default("batch.max_batch_size", batch.max_batch_size as u64)?
            .set_default("batch.batch_delay_ms", batch.batch_delay_ms)?
            .set_default("batch.max_pending_requests", batch.max_pending_requests as u64)?
            .set_default("batch.max_retries", u64::from(batch.max_retries))?
            .set_default("batch.backoff_ms", batch.backoff_ms)?
            .set_default("batch.request_timeout_ms", batch.request_timeout_ms)?
            .set_default("batch.wire_timeout_ms", batch.wire_timeout_ms)?
            .set_default("batch.dedupe_ttl_ms", batch.dedupe_ttl_ms)?
            .set_default("batch.rate_per_second", batch.rate_per_second)?
            .set_default("batch.bucket_capacity", u64::from(batch.bucket_capacity))?
            .set_default("batch.transport_kind", batch.transport_kind.as_str())?
            .set_default("http.concurrent_limit", http.concurrent_limit as u64)?
            .set_default("http.connect_timeout_ms", http.connect_timeout_ms)?
            .set_default("http.permit_timeout_ms", http.permit_timeout_ms)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .set_default("metrics.enabled", true)?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("EMBER").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, or the file named by
    /// `EMBER_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("EMBER_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string for the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoints.is_empty() {
            return Err("No RPC endpoints configured".to_string());
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.id.is_empty() {
                return Err(format!("Endpoint with URL {} has an empty id", endpoint.url));
            }
            if !seen.insert(endpoint.id.as_str()) {
                return Err(format!("Duplicate endpoint id: {}", endpoint.id));
            }
            if endpoint.url.is_empty() {
                return Err(format!("Empty URL for endpoint: {}", endpoint.id));
            }
            if !endpoint.url.starts_with("http") {
                return Err(format!("Invalid URL for endpoint {}: {}", endpoint.id, endpoint.url));
            }
            if endpoint.weight == 0 {
                return Err(format!("Weight of endpoint {} must be greater than 0", endpoint.id));
            }
        }

        if self.health.interval_seconds == 0 {
            return Err("Health check interval must be greater than 0".to_string());
        }
        if self.health.probe_timeout_ms == 0 {
            return Err("Health probe timeout must be greater than 0".to_string());
        }
        if self.health.probe_method.is_empty() {
            return Err("Health probe method must not be empty".to_string());
        }
        if !(self.health.recovery_latency_ratio > 0.0 && self.health.recovery_latency_ratio <= 1.0)
        {
            return Err("Recovery latency ratio must be in (0, 1]".to_string());
        }

        if self.failover.request_timeout_ms == 0 {
            return Err("Failover request timeout must be greater than 0".to_string());
        }
        if self.failover.backoff_multiplier.is_nan() || self.failover.backoff_multiplier < 1.0 {
            return Err("Failover backoff multiplier must be at least 1".to_string());
        }

        if self.batch.max_batch_size == 0 {
            return Err("Max batch size must be greater than 0".to_string());
        }
        if self.batch.max_pending_requests == 0 {
            return Err("Max pending requests must be greater than 0".to_string());
        }
        if self.batch.bucket_capacity == 0 {
            return Err("Bucket capacity must be greater than 0".to_string());
        }
        if !(self.batch.rate_per_second.is_finite() && self.batch.rate_per_second > 0.0) {
            return Err("Batch rate per second must be greater than 0".to_string());
        }
        if self.batch.backoff_ms.is_empty() {
            return Err("Batch backoff schedule must not be empty".to_string());
        }
        if self.batch.request_timeout_ms == 0 || self.batch.wire_timeout_ms == 0 {
            return Err("Batch timeouts must be greater than 0".to_string());
        }
        if let Some(url) = &self.batch.endpoint_url {
            if !url.starts_with("http") {
                return Err(format!("Invalid batch endpoint URL: {url}"));
            }
        }

        if self.http.concurrent_limit == 0 {
            return Err("HTTP concurrent limit must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }

    #[must_use]
    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            failover_threshold: self.health.failover_threshold,
            recovery_threshold: self.health.recovery_threshold,
            degraded_threshold_ms: self.health.degraded_threshold_ms,
            recovery_latency_ratio: self.health.recovery_latency_ratio,
        }
    }

    #[must_use]
    pub fn health_monitor_config(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            check_interval: Duration::from_secs(self.health.interval_seconds),
            probe_method: self.health.probe_method.clone(),
            probe_timeout: Duration::from_millis(self.health.probe_timeout_ms),
        }
    }

    #[must_use]
    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            max_retries: self.failover.max_retries,
            retry_delay: Duration::from_millis(self.failover.retry_delay_ms),
            backoff_multiplier: self.failover.backoff_multiplier,
            request_timeout: Duration::from_millis(self.failover.request_timeout_ms),
            default_kind: self.failover.default_kind,
        }
    }

    #[must_use]
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_batch_size: self.batch.max_batch_size,
            batch_delay: Duration::from_millis(self.batch.batch_delay_ms),
            max_pending_requests: self.batch.max_pending_requests,
            max_retries: self.batch.max_retries,
            backoff: self.batch.backoff_ms.iter().copied().map(Duration::from_millis).collect(),
            request_timeout: Duration::from_millis(self.batch.request_timeout_ms),
            wire_timeout: Duration::from_millis(self.batch.wire_timeout_ms),
            dedupe_ttl: Duration::from_millis(self.batch.dedupe_ttl_ms),
            rate_per_second: self.batch.rate_per_second,
            bucket_capacity: self.batch.bucket_capacity,
        }
    }

    #[must_use]
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            concurrent_limit: self.http.concurrent_limit,
            permit_timeout_ms: self.http.permit_timeout_ms,
            connect_timeout_ms: self.http.connect_timeout_ms,
        }
    }
}
