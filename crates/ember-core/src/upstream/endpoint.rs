use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{types::TransportKind, upstream::errors::UpstreamError};

/// Registration parameters for one upstream endpoint.
///
/// This is also the shape of each entry in the `endpoints` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub transport_kind: TransportKind,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Advertised requests-per-second allowance of the provider plan.
    #[serde(default)]
    pub rate_limit: u32,
    /// Higher is preferred. Endpoints with priority 0 are never promoted to primary by
    /// recovery.
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

impl EndpointConfig {
    #[must_use]
    pub fn new(url: impl Into<String>, transport_kind: TransportKind) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            transport_kind,
            weight: default_weight(),
            rate_limit: 0,
            priority: 0,
            staked: false,
            region: String::new(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_staked(mut self, staked: bool) -> Self {
        self.staked = staked;
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }
}

/// A registered upstream endpoint. Immutable once registered; re-registering the same
/// id replaces it.
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub id: String,
    pub url: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub transport_kind: TransportKind,
    pub weight: u32,
    pub rate_limit: u32,
    pub priority: i32,
    pub staked: bool,
    pub region: String,
    /// Fully resolved URL requests are posted to, with the API key applied.
    #[serde(skip)]
    request_url: String,
}

impl Endpoint {
    /// Validates `config` and builds the endpoint record.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidEndpoint`] if the id or URL is empty or the URL
    /// does not parse as an absolute URL.
    pub fn new(id: impl Into<String>, config: EndpointConfig) -> Result<Self, UpstreamError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(UpstreamError::InvalidEndpoint("endpoint id is empty".to_string()));
        }
        if config.url.trim().is_empty() {
            return Err(UpstreamError::InvalidEndpoint(format!("endpoint '{id}' has an empty url")));
        }

        let mut parsed = Url::parse(&config.url).map_err(|e| {
            UpstreamError::InvalidEndpoint(format!("endpoint '{id}' has an invalid url: {e}"))
        })?;
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            parsed.query_pairs_mut().append_pair("api-key", key);
        }

        Ok(Self {
            id,
            url: config.url,
            api_key: config.api_key,
            transport_kind: config.transport_kind,
            weight: config.weight,
            rate_limit: config.rate_limit,
            priority: config.priority,
            staked: config.staked,
            region: config.region,
            request_url: parsed.into(),
        })
    }

    /// URL to post JSON-RPC payloads to.
    #[must_use]
    pub fn request_url(&self) -> &str {
        &self.request_url
    }
}

/// Health of one endpoint as observed by probes and request outcomes.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_error: Option<String>,
    pub degraded: bool,
}

impl Default for HealthStatus {
    /// Endpoints start out healthy until proven otherwise.
    fn default() -> Self {
        Self {
            healthy: true,
            last_check: None,
            latency_ms: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_error: None,
            degraded: false,
        }
    }
}

/// Accumulated request counters for one endpoint. Reset only by unregistration.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EndpointStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub avg_latency_ms: f64,
    pub rate_limit_hits: u64,
    pub last_request: Option<DateTime<Utc>>,
}

impl EndpointStats {
    pub(crate) fn record_success(&mut self, latency_ms: u64) {
        self.requests += 1;
        self.successes += 1;
        self.total_latency_ms = self.total_latency_ms.saturating_add(latency_ms);
        #[allow(clippy::cast_precision_loss)]
        {
            self.avg_latency_ms = self.total_latency_ms as f64 / self.successes as f64;
        }
        self.last_request = Some(Utc::now());
    }

    pub(crate) fn record_failure(&mut self, rate_limited: bool) {
        self.requests += 1;
        self.failures += 1;
        if rate_limited {
            self.rate_limit_hits += 1;
        }
        self.last_request = Some(Utc::now());
    }

    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.successes as f64 / self.requests as f64;
        rate
    }
}

/// Read-only snapshot of an endpoint and its current state.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub endpoint: Endpoint,
    pub health: HealthStatus,
    pub stats: EndpointStats,
    pub is_primary: bool,
}
