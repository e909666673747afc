use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    metrics::MetricsCollector,
    types::TransportKind,
    upstream::{
        errors::UpstreamError, executor::DirectExecutor, registry::EndpointRegistry,
        selector::SelectOptions,
    },
};

/// Retry policy of the failover path.
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub request_timeout: Duration,
    pub default_kind: TransportKind,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            request_timeout: Duration::from_secs(10),
            default_kind: TransportKind::Standard,
        }
    }
}

impl FailoverConfig {
    /// Delay before the attempt following `attempt` (zero-based).
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        self.retry_delay.mul_f64(self.backoff_multiplier.powi(exponent))
    }
}

/// Per-call overrides; unset fields fall back to [`FailoverConfig`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub kind: Option<TransportKind>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub prefer_staked: bool,
}

impl RequestOptions {
    #[must_use]
    pub fn kind(mut self, kind: TransportKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn prefer_staked(mut self, prefer: bool) -> Self {
        self.prefer_staked = prefer;
        self
    }
}

/// Snapshot of failover path activity.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FailoverStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retries: u64,
    pub endpoint_switches: u64,
    pub no_healthy_endpoint: u64,
    pub rate_limit_hits: u64,
    pub requests_by_method: HashMap<String, u64>,
}

#[derive(Default)]
struct FailoverCounters {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    retries: AtomicU64,
    endpoint_switches: AtomicU64,
    no_healthy_endpoint: AtomicU64,
    rate_limit_hits: AtomicU64,
    requests_by_method: DashMap<String, u64>,
}

/// Executes single JSON-RPC calls with endpoint failover.
///
/// Each attempt goes to an endpoint not yet tried by this call; failures are recorded
/// against the endpoint before backing off and moving on.
pub struct FailoverClient {
    registry: Arc<EndpointRegistry>,
    executor: Arc<DirectExecutor>,
    metrics_collector: Arc<MetricsCollector>,
    config: ArcSwap<FailoverConfig>,
    counters: FailoverCounters,
}

impl FailoverClient {
    #[must_use]
    pub fn new(
        registry: Arc<EndpointRegistry>,
        executor: Arc<DirectExecutor>,
        metrics_collector: Arc<MetricsCollector>,
        config: FailoverConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            metrics_collector,
            config: ArcSwap::from_pointee(config),
            counters: FailoverCounters::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<FailoverConfig> {
        self.config.load_full()
    }

    /// Replaces the retry policy; in-flight calls keep the policy they started with.
    pub fn update_config(&self, config: FailoverConfig) {
        self.config.store(Arc::new(config));
    }

    /// Executes `method` with up to `retries + 1` attempts across distinct endpoints.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::NoHealthyEndpoint`] as soon as an attempt finds no untried
    ///   healthy endpoint
    /// - the last observed error once all `retries + 1` attempts have failed
    /// - non-retryable errors such as [`UpstreamError::InvalidRequest`] immediately
    pub async fn execute_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, UpstreamError> {
        let config = self.config.load_full();
        let kind = options.kind.unwrap_or(config.default_kind);
        let timeout = options.timeout.unwrap_or(config.request_timeout);
        let retries = options.retries.unwrap_or(config.max_retries);

        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        *self.counters.requests_by_method.entry(method.to_string()).or_insert(0) += 1;

        let mut select_options = SelectOptions::default().prefer_staked(options.prefer_staked);
        let mut last_error: Option<UpstreamError> = None;

        for attempt in 0..=retries {
            let Some(endpoint) = self.registry.select_endpoint(kind, &select_options) else {
                self.counters.no_healthy_endpoint.fetch_add(1, Ordering::Relaxed);
                self.metrics_collector.record_no_healthy_endpoint(kind);
                tracing::warn!(
                    method,
                    kind = %kind,
                    attempt,
                    last_error = last_error.as_ref().map(tracing::field::display),
                    "no healthy endpoint available"
                );
                return Err(self.fail(UpstreamError::NoHealthyEndpoint(kind)));
            };

            if attempt > 0 {
                self.counters.endpoint_switches.fetch_add(1, Ordering::Relaxed);
            }

            tracing::debug!(method, endpoint = %endpoint.id, attempt, "executing request");

            match self.executor.execute(&endpoint, method, params.clone(), timeout).await {
                Ok(execution) => {
                    let latency_ms = execution.latency_ms();
                    self.registry.record_request_success(&endpoint.id, latency_ms);
                    self.metrics_collector.record_request(method, &endpoint.id, true, latency_ms);
                    self.counters.successful_requests.fetch_add(1, Ordering::Relaxed);
                    return Ok(execution.result);
                }
                Err(e) => {
                    self.registry.record_request_failure(&endpoint.id, &e);
                    self.metrics_collector.record_request(method, &endpoint.id, false, 0);
                    self.metrics_collector.record_endpoint_error(&endpoint.id, &e);
                    if e.is_rate_limit() {
                        self.counters.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                    }

                    if !e.is_retryable() {
                        return Err(self.fail(e));
                    }

                    tracing::debug!(
                        method,
                        endpoint = %endpoint.id,
                        attempt,
                        error = %e,
                        "request attempt failed"
                    );
                    select_options = select_options.exclude(endpoint.id.clone());
                    last_error = Some(e);

                    if attempt < retries {
                        let delay = config.backoff_delay(attempt);
                        self.counters.retries.fetch_add(1, Ordering::Relaxed);
                        self.metrics_collector.record_retry_attempt(
                            method,
                            attempt + 1,
                            u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let error = last_error.unwrap_or(UpstreamError::NoHealthyEndpoint(kind));
        tracing::warn!(method, kind = %kind, retries, error = %error, "request failed after all attempts");
        Err(self.fail(error))
    }

    fn fail(&self, error: UpstreamError) -> UpstreamError {
        self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
        error
    }

    #[must_use]
    pub fn stats(&self) -> FailoverStats {
        FailoverStats {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            successful_requests: self.counters.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.counters.failed_requests.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            endpoint_switches: self.counters.endpoint_switches.load(Ordering::Relaxed),
            no_healthy_endpoint: self.counters.no_healthy_endpoint.load(Ordering::Relaxed),
            rate_limit_hits: self.counters.rate_limit_hits.load(Ordering::Relaxed),
            requests_by_method: self
                .counters
                .requests_by_method
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}
