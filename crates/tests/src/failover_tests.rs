//! Integration tests for the failover request path against mock HTTP endpoints.
//!
//! These tests verify that:
//! - A failing primary is skipped in favour of the next endpoint within one call
//! - Exhausting every endpoint surfaces the last observed error
//! - Rate limits are counted separately from other failures
//! - Repeated request failures take an endpoint out of rotation

use crate::mock_infrastructure::{endpoint_config, RpcMockBuilder};
use ember_core::{
    metrics::MetricsCollector,
    types::TransportKind,
    upstream::{
        DirectExecutor, EndpointRegistry, FailoverClient, FailoverConfig, HealthPolicy, HttpClient,
        RequestOptions, UpstreamError,
    },
};
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn failover_client(registry: &Arc<EndpointRegistry>) -> FailoverClient {
    let transport = Arc::new(HttpClient::new().expect("Failed to create HTTP client"));
    FailoverClient::new(
        Arc::clone(registry),
        Arc::new(DirectExecutor::new(transport)),
        Arc::new(MetricsCollector::detached()),
        FailoverConfig {
            retry_delay: Duration::from_millis(5),
            request_timeout: Duration::from_secs(5),
            ..FailoverConfig::default()
        },
    )
}

/// Primary at priority 10 and a zero-weight backup at priority 5, so the primary is
/// always tried first.
fn primary_and_backup(primary_url: &str, backup_url: &str) -> Arc<EndpointRegistry> {
    let registry = Arc::new(EndpointRegistry::new(HealthPolicy::default()));
    registry.register_endpoint("primary", endpoint_config(primary_url, 10, 1)).unwrap();
    registry.register_endpoint("backup", endpoint_config(backup_url, 5, 0)).unwrap();
    registry
}

#[tokio::test]
async fn test_failing_primary_falls_through_to_backup() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_http_status(500, "internal error");
    let mut backup = RpcMockBuilder::new().await;
    backup.mock_method("getSlot", &json!(285_000_000u64));

    let registry = primary_and_backup(&primary.url(), &backup.url());
    let client = failover_client(&registry);

    let result = client.execute_request("getSlot", None, RequestOptions::default()).await;
    assert_eq!(result.unwrap(), json!(285_000_000u64));

    let stats = client.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_requests, 1);
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.endpoint_switches, 1);

    let primary_status = registry.get_endpoint_status("primary").unwrap();
    assert_eq!(primary_status.stats.failures, 1);
    assert_eq!(primary_status.health.consecutive_failures, 1);
    assert!(primary_status.health.healthy, "one failure is below the failover threshold");

    let backup_status = registry.get_endpoint_status("backup").unwrap();
    assert_eq!(backup_status.stats.successes, 1);
}

#[tokio::test]
async fn test_all_endpoints_failing_returns_last_error() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_http_status(500, "primary down");
    let mut backup = RpcMockBuilder::new().await;
    backup.mock_http_status(503, "backup down");

    let registry = primary_and_backup(&primary.url(), &backup.url());
    let client = failover_client(&registry);

    let result = client.execute_request("getSlot", None, RequestOptions::default().retries(1)).await;
    assert!(matches!(result, Err(UpstreamError::HttpError(503, _))), "got {result:?}");

    let stats = client.stats();
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.no_healthy_endpoint, 0);
    assert_eq!(stats.endpoint_switches, 1);
}

#[tokio::test]
async fn test_retry_budget_beyond_endpoint_count_reports_no_healthy_endpoint() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_http_status(500, "primary down");
    let mut backup = RpcMockBuilder::new().await;
    backup.mock_http_status(503, "backup down");

    let registry = primary_and_backup(&primary.url(), &backup.url());
    let client = failover_client(&registry);

    let result = client.execute_request("getSlot", None, RequestOptions::default().retries(3)).await;
    assert_eq!(result.unwrap_err(), UpstreamError::NoHealthyEndpoint(TransportKind::Standard));

    let stats = client.stats();
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.no_healthy_endpoint, 1);
    assert_eq!(stats.endpoint_switches, 1);
    assert_eq!(registry.get_endpoint_status("primary").unwrap().stats.failures, 1);
    assert_eq!(registry.get_endpoint_status("backup").unwrap().stats.failures, 1);
}

#[tokio::test]
async fn test_rate_limited_primary_counts_rate_limit_hit() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_http_status(429, "slow down");
    let mut backup = RpcMockBuilder::new().await;
    backup.mock_method("getBalance", &json!({"context": {"slot": 1}, "value": 42}));

    let registry = primary_and_backup(&primary.url(), &backup.url());
    let client = failover_client(&registry);

    let result = client
        .execute_request("getBalance", Some(json!(["Vote111111111111111111111111111111111111111"])), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(result["value"], json!(42));

    assert_eq!(client.stats().rate_limit_hits, 1);
    let primary_status = registry.get_endpoint_status("primary").unwrap();
    assert_eq!(primary_status.stats.rate_limit_hits, 1);
    assert_eq!(primary_status.stats.failures, 1);
}

#[tokio::test]
async fn test_rpc_error_is_returned_when_no_endpoint_succeeds() {
    let mut only = RpcMockBuilder::new().await;
    only.mock_rpc_error("getAccountInfo", -32602, "Invalid param: WrongSize");

    let registry = Arc::new(EndpointRegistry::new(HealthPolicy::default()));
    registry.register_endpoint("only", endpoint_config(&only.url(), 10, 1)).unwrap();
    let client = failover_client(&registry);

    let result = client
        .execute_request("getAccountInfo", Some(json!(["bad"])), RequestOptions::default().retries(0))
        .await;
    match result {
        Err(UpstreamError::RpcError(code, message)) => {
            assert_eq!(code, -32602);
            assert!(message.contains("WrongSize"));
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_repeated_failures_take_endpoint_out_of_rotation() {
    let mut only = RpcMockBuilder::new().await;
    only.mock_http_status(502, "bad gateway");

    let registry = Arc::new(EndpointRegistry::new(HealthPolicy::default()));
    registry.register_endpoint("only", endpoint_config(&only.url(), 10, 1)).unwrap();
    let client = failover_client(&registry);

    for _ in 0..3 {
        let result = client.execute_request("getSlot", None, RequestOptions::default().retries(0)).await;
        assert!(matches!(result, Err(UpstreamError::HttpError(502, _))));
    }
    assert!(!registry.health("only").unwrap().healthy);

    let result = client.execute_request("getSlot", None, RequestOptions::default()).await;
    assert_eq!(result.unwrap_err(), UpstreamError::NoHealthyEndpoint(TransportKind::Standard));
    assert_eq!(client.stats().no_healthy_endpoint, 1);
}

#[tokio::test]
async fn test_empty_registry_reports_no_healthy_endpoint() {
    let registry = Arc::new(EndpointRegistry::new(HealthPolicy::default()));
    let client = failover_client(&registry);

    let result = client
        .execute_request("getAsset", None, RequestOptions::default().kind(TransportKind::Das))
        .await;
    assert_eq!(result.unwrap_err(), UpstreamError::NoHealthyEndpoint(TransportKind::Das));
}
