//! Test Helper Functions and Utilities
//!
//! Endpoint and configuration fixtures shared by the integration tests.

use ember_core::{
    config::{AppConfig, BatchSettings, EndpointSettings},
    metrics::MetricsCollector,
    runtime::EmberRuntime,
    types::TransportKind,
    upstream::{EndpointConfig, RpcTransport},
};
use std::sync::Arc;

/// Endpoint entry for the `endpoints` config section.
#[must_use]
pub fn endpoint_settings(id: &str, url: &str, priority: i32) -> EndpointSettings {
    EndpointSettings {
        id: id.to_string(),
        url: url.to_string(),
        api_key: None,
        transport_kind: TransportKind::Standard,
        weight: 1,
        rate_limit: 0,
        priority,
        staked: false,
        region: String::new(),
    }
}

/// Registration parameters for a standard endpoint with a fixed priority and weight.
#[must_use]
pub fn endpoint_config(url: &str, priority: i32, weight: u32) -> EndpointConfig {
    EndpointConfig::new(url, TransportKind::Standard).with_priority(priority).with_weight(weight)
}

/// Batch settings tuned for tests: short delays and an effectively unlimited rate.
#[must_use]
pub fn fast_batch_settings() -> BatchSettings {
    BatchSettings {
        batch_delay_ms: 5,
        backoff_ms: vec![5, 10],
        rate_per_second: 100_000.0,
        bucket_capacity: 100_000,
        ..BatchSettings::default()
    }
}

#[must_use]
pub fn config_with(endpoints: Vec<EndpointSettings>) -> AppConfig {
    let mut config = AppConfig { endpoints, batch: fast_batch_settings(), ..AppConfig::default() };
    config.failover.retry_delay_ms = 5;
    config.metrics.enabled = false;
    config
}

/// Builds a runtime without the background health loop.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn runtime_with(config: AppConfig, transport: Option<Arc<dyn RpcTransport>>) -> EmberRuntime {
    let mut builder = EmberRuntime::builder()
        .with_config(config)
        .with_metrics_collector(Arc::new(MetricsCollector::detached()));
    if let Some(transport) = transport {
        builder = builder.with_transport(transport);
    }
    builder.build().expect("Failed to build runtime")
}
