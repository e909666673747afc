//! # Metrics
//!
//! Every component keeps its own in-process counters (see `FailoverStats`,
//! `BatcherStats`, `HealthMonitorStats`) which back the read-only snapshot API. The
//! [`MetricsCollector`] mirrors the same events into the `metrics` facade so that a
//! Prometheus recorder, when installed, can expose them.
//!
//! Recording is lock-free: counters, gauges and histograms are atomic in the recorder,
//! and endpoint and method labels are interned to avoid per-request allocations.

use crate::{
    types::{Priority, TransportKind},
    upstream::{endpoint::HealthStatus, errors::UpstreamError},
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{borrow::Cow, sync::OnceLock};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

// Endpoint ids are interned once and leaked; the set is bounded by configuration.
static ENDPOINT_NAME_POOL: OnceLock<dashmap::DashMap<String, &'static str>> = OnceLock::new();

#[inline]
fn endpoint_to_static(endpoint: &str) -> Cow<'static, str> {
    let pool = ENDPOINT_NAME_POOL.get_or_init(dashmap::DashMap::new);

    if let Some(interned) = pool.get(endpoint) {
        return Cow::Borrowed(*interned);
    }

    let owned = endpoint.to_string();
    let leaked: &'static str = Box::leak(owned.clone().into_boxed_str());
    pool.insert(owned, leaked);
    Cow::Borrowed(leaked)
}

#[inline]
fn method_to_static(method: &str) -> Cow<'static, str> {
    match method {
        "getAccountInfo" => Cow::Borrowed("getAccountInfo"),
        "getBalance" => Cow::Borrowed("getBalance"),
        "getBlockHeight" => Cow::Borrowed("getBlockHeight"),
        "getHealth" => Cow::Borrowed("getHealth"),
        "getLatestBlockhash" => Cow::Borrowed("getLatestBlockhash"),
        "getMultipleAccounts" => Cow::Borrowed("getMultipleAccounts"),
        "getProgramAccounts" => Cow::Borrowed("getProgramAccounts"),
        "getSignaturesForAddress" => Cow::Borrowed("getSignaturesForAddress"),
        "getSignatureStatuses" => Cow::Borrowed("getSignatureStatuses"),
        "getSlot" => Cow::Borrowed("getSlot"),
        "getTokenAccountsByOwner" => Cow::Borrowed("getTokenAccountsByOwner"),
        "getTransaction" => Cow::Borrowed("getTransaction"),
        "getAsset" => Cow::Borrowed("getAsset"),
        "getAssetsByOwner" => Cow::Borrowed("getAssetsByOwner"),
        "sendTransaction" => Cow::Borrowed("sendTransaction"),
        "simulateTransaction" => Cow::Borrowed("simulateTransaction"),
        _ => Cow::Owned(method.to_string()),
    }
}

/// Maps a state value to a metric label and a gauge reading.
pub trait MetricsState {
    fn as_metric_str(&self) -> &'static str;
    fn as_gauge_value(&self) -> f64;
}

impl MetricsState for HealthStatus {
    fn as_metric_str(&self) -> &'static str {
        match (self.healthy, self.degraded) {
            (false, _) => "unhealthy",
            (true, true) => "degraded",
            (true, false) => "healthy",
        }
    }

    fn as_gauge_value(&self) -> f64 {
        match (self.healthy, self.degraded) {
            (false, _) => 0.0,
            (true, true) => 0.5,
            (true, false) => 1.0,
        }
    }
}

impl MetricsState for Priority {
    fn as_metric_str(&self) -> &'static str {
        self.as_str()
    }

    fn as_gauge_value(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let value = self.index() as f64;
        value
    }
}

impl MetricsState for UpstreamError {
    fn as_metric_str(&self) -> &'static str {
        self.class().as_str()
    }

    fn as_gauge_value(&self) -> f64 {
        if self.is_retryable() {
            0.5
        } else {
            1.0
        }
    }
}

fn try_init_prometheus_recorder(
) -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match try_init_prometheus_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                let recorder = PrometheusBuilder::new().build_recorder();
                tracing::warn!(
                    error = %e,
                    "using fallback Prometheus recorder, metrics may not be globally visible"
                );
                recorder.handle()
            }
        })
        .clone()
}

/// Mirrors runtime events into the `metrics` facade.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    prometheus_handle: Option<PrometheusHandle>,
}

impl MetricsCollector {
    /// Creates a collector backed by the process-wide Prometheus recorder, installing it
    /// on first use.
    #[must_use]
    pub fn new() -> Self {
        Self { prometheus_handle: Some(init_prometheus_recorder()) }
    }

    /// Creates a collector that only emits to whatever recorder is already installed,
    /// which is a no-op when none is.
    #[must_use]
    pub fn detached() -> Self {
        Self { prometheus_handle: None }
    }

    /// Renders the Prometheus exposition text, or an empty string for a detached
    /// collector.
    #[must_use]
    pub fn get_prometheus_metrics(&self) -> String {
        self.prometheus_handle.as_ref().map(PrometheusHandle::render).unwrap_or_default()
    }

    // Failover path

    /// Records the outcome of one attempt on the failover path.
    pub fn record_request(&self, method: &str, endpoint: &str, success: bool, latency_ms: u64) {
        let method_cow = method_to_static(method);
        let endpoint_cow = endpoint_to_static(endpoint);

        counter!("ember_requests_total", "method" => method_cow.clone(), "endpoint" => endpoint_cow.clone()).increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!("ember_request_duration_seconds", "method" => method_cow.clone(), "endpoint" => endpoint_cow.clone()).record(latency_ms as f64 / 1000.0);

        if success {
            counter!("ember_requests_success_total", "method" => method_cow, "endpoint" => endpoint_cow).increment(1);
        } else {
            counter!("ember_requests_error_total", "method" => method_cow, "endpoint" => endpoint_cow).increment(1);
        }
    }

    pub fn record_endpoint_error(&self, endpoint: &str, error: &UpstreamError) {
        counter!(
            "ember_endpoint_errors_total",
            "endpoint" => endpoint_to_static(endpoint),
            "class" => error.as_metric_str()
        )
        .increment(1);
        if error.is_rate_limit() {
            counter!("ember_rate_limit_hits_total", "endpoint" => endpoint_to_static(endpoint))
                .increment(1);
        }
    }

    pub fn record_retry_attempt(&self, method: &str, attempt: u32, delay_ms: u64) {
        counter!("ember_retry_attempts_total", "method" => method_to_static(method)).increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!("ember_retry_delay_seconds").record(delay_ms as f64 / 1000.0);
        gauge!("ember_retry_attempt_number").set(f64::from(attempt));
    }

    pub fn record_no_healthy_endpoint(&self, kind: TransportKind) {
        counter!("ember_no_healthy_endpoint_total", "kind" => kind.as_str()).increment(1);
    }

    // Health monitor

    pub fn record_health_check(&self, endpoint: &str, success: bool, latency_ms: u64) {
        let endpoint_cow = endpoint_to_static(endpoint);
        #[allow(clippy::cast_precision_loss)]
        histogram!("ember_health_check_duration_seconds", "endpoint" => endpoint_cow.clone())
            .record(latency_ms as f64 / 1000.0);

        if success {
            counter!("ember_health_check_success_total", "endpoint" => endpoint_cow).increment(1);
        } else {
            counter!("ember_health_check_failure_total", "endpoint" => endpoint_cow).increment(1);
        }
    }

    pub fn record_endpoint_health(&self, endpoint: &str, health: &HealthStatus) {
        gauge!("ember_endpoint_health", "endpoint" => endpoint_to_static(endpoint))
            .set(health.as_gauge_value());
    }

    pub fn record_healthy_endpoint_count(&self, count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("ember_healthy_endpoints").set(count as f64);
    }

    pub fn record_failover(&self, kind: TransportKind) {
        counter!("ember_failovers_total", "kind" => kind.as_str()).increment(1);
    }

    pub fn record_recovery(&self, kind: TransportKind) {
        counter!("ember_recoveries_total", "kind" => kind.as_str()).increment(1);
    }

    // Batch coalescer

    pub fn record_request_queued(&self, priority: Priority, deduplicated: bool) {
        if deduplicated {
            counter!("ember_batch_deduplicated_total").increment(1);
        } else {
            counter!("ember_batch_queued_total", "priority" => priority.as_metric_str()).increment(1);
        }
    }

    pub fn record_queue_rejected(&self) {
        counter!("ember_batch_rejected_total").increment(1);
    }

    pub fn record_batch_dispatch(&self, batch_size: usize, duration_ms: u64, success: bool) {
        #[allow(clippy::cast_precision_loss)]
        {
            histogram!("ember_batch_size").record(batch_size as f64);
            histogram!("ember_batch_duration_seconds").record(duration_ms as f64 / 1000.0);
        }
        if success {
            counter!("ember_batches_dispatched_total").increment(1);
        } else {
            counter!("ember_batch_wire_failures_total").increment(1);
        }
    }

    pub fn record_batch_retry(&self, count: usize) {
        counter!("ember_batch_retried_total").increment(count as u64);
    }

    /// Records how a queued request finished: `success`, `error`, `timeout` or `shutdown`.
    pub fn record_intent_completed(&self, outcome: &'static str) {
        counter!("ember_batch_completed_total", "outcome" => outcome).increment(1);
    }

    pub fn record_pending_requests(&self, pending: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("ember_batch_pending").set(pending as f64);
    }

    pub fn record_tokens_available(&self, tokens: f64) {
        gauge!("ember_rate_limit_tokens").set(tokens);
    }
}
