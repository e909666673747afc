//! Integration tests for the runtime over real HTTP against mock endpoints.
//!
//! These tests verify the runtime's behavioral contracts:
//! - Every request path reaches the upstream with the endpoint's API key
//! - Background health probing starts and stops with the runtime
//! - Shutdown is idempotent and rejects later requests
//!
//! Tests use `tokio::time::timeout` to prevent hanging on failures.

use crate::mock_infrastructure::{
    config_with, endpoint_settings, runtime_with, Reply, RpcMockBuilder, ScriptedTransport,
};
use ember_core::{
    batch::{BatchRequest, QueueBatchOptions},
    metrics::MetricsCollector,
    runtime::EmberRuntime,
    types::TransportKind,
    upstream::{EndpointConfig, RequestOptions, RpcTransport, UpstreamError},
};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

#[tokio::test]
async fn test_execute_request_sends_api_key() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_method_with_api_key("getSlot", "secret-key", &json!(301_000_000u64));

    let mut endpoint = endpoint_settings("helius", &mock.url(), 10);
    endpoint.api_key = Some("secret-key".to_string());
    let runtime = runtime_with(config_with(vec![endpoint]), None);

    let slot = runtime.execute_request("getSlot", None, RequestOptions::default()).await.unwrap();
    assert_eq!(slot, json!(301_000_000u64));

    let status = runtime.get_endpoint_status("helius").unwrap();
    assert_eq!(status.stats.successes, 1);
    assert!(status.is_primary);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_missing_api_key_is_not_matched() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_method_with_api_key("getSlot", "secret-key", &json!(1));

    let runtime = runtime_with(config_with(vec![endpoint_settings("helius", &mock.url(), 10)]), None);

    // mockito answers unmatched requests with 501.
    let result = runtime.execute_request("getSlot", None, RequestOptions::default().retries(0)).await;
    assert!(matches!(result, Err(UpstreamError::HttpError(501, _))), "got {result:?}");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_queue_batch_sends_one_wire_batch() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_batch(
        "getBlockTime",
        &[(1, json!(1_700_000_000)), (2, json!(1_700_000_001)), (3, json!(1_700_000_002))],
        1,
    );

    let runtime = runtime_with(config_with(vec![endpoint_settings("helius", &mock.url(), 10)]), None);

    let requests =
        (0..3).map(|i| BatchRequest::new("getBlockTime", Some(json!([300_000_000 + i])))).collect();
    let results = runtime.queue_batch(requests, QueueBatchOptions::default()).await.unwrap();

    let values: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(values, vec![json!(1_700_000_000), json!(1_700_000_001), json!(1_700_000_002)]);
    assert_eq!(runtime.get_batcher_stats().batches_dispatched, 1);
    assert_eq!(runtime.get_endpoint_status("helius").unwrap().stats.successes, 1);

    mock.assert_all();
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_queue_batch_stop_on_error_surfaces_first_failure() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_rpc_error("getTransaction", -32009, "Transaction version (0) is not supported");

    // A whole-batch error object is a wire failure; keep retries below the failover
    // threshold so the endpoint stays selectable.
    let mut config = config_with(vec![endpoint_settings("helius", &mock.url(), 10)]);
    config.batch.max_retries = 1;
    let runtime = runtime_with(config, None);

    let requests = vec![
        BatchRequest::new("getTransaction", Some(json!(["sig-a"]))),
        BatchRequest::new("getTransaction", Some(json!(["sig-b"]))),
    ];
    let result = runtime
        .queue_batch(requests, QueueBatchOptions { stop_on_error: true, timeout: None })
        .await;
    assert!(matches!(result, Err(UpstreamError::RpcError(-32009, _))), "got {result:?}");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_execute_immediate_bypasses_queue() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_method_expect("getLatestBlockhash", &json!({"value": {"blockhash": "abc"}}), 1);

    let runtime = runtime_with(config_with(vec![endpoint_settings("helius", &mock.url(), 10)]), None);

    let result = runtime.execute_immediate("getLatestBlockhash", None).await.unwrap();
    assert_eq!(result["value"]["blockhash"], json!("abc"));

    let stats = runtime.get_batcher_stats();
    assert_eq!(stats.immediate, 1);
    assert_eq!(stats.queued, 0);

    mock.assert_all();
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_health_loop_runs_until_shutdown() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_reply("probe.test", Reply::Result(json!(250_000_000u64)));

    let runtime = EmberRuntime::builder()
        .with_config(config_with(vec![endpoint_settings("probe", "http://probe.test", 10)]))
        .with_transport(transport.clone())
        .with_metrics_collector(Arc::new(MetricsCollector::detached()))
        .enable_health_monitor()
        .build()
        .unwrap();
    assert!(runtime.has_health_task());

    // The first cycle runs as soon as the loop starts.
    timeout(Duration::from_secs(2), async {
        while runtime.get_health_stats().cycles == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("health loop did not run");
    assert!(transport.calls_to("probe.test") >= 1);

    let mut shutdown_rx = runtime.shutdown_receiver();
    runtime.shutdown().await;
    assert!(!runtime.has_health_task());
    assert!(timeout(Duration::from_secs(1), shutdown_rx.recv()).await.is_ok());

    let probes = transport.calls_to("probe.test");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.calls_to("probe.test"), probes);
}

#[tokio::test]
async fn test_dynamic_endpoints_and_shutdown() {
    let transport = Arc::new(ScriptedTransport::new());
    let shared: Arc<dyn RpcTransport> = transport.clone();
    let runtime =
        runtime_with(config_with(vec![endpoint_settings("first", "http://first.test", 10)]), Some(shared));

    runtime
        .register_endpoint(
            "das",
            EndpointConfig::new("http://das.test", TransportKind::Das).with_priority(10),
        )
        .unwrap();
    let result = runtime
        .execute_request("getAsset", Some(json!({"id": "asset"})), RequestOptions::default().kind(TransportKind::Das))
        .await
        .unwrap();
    assert_eq!(result["echo"], json!("getAsset"));
    assert_eq!(transport.calls_to("das.test"), 1);

    assert!(runtime.unregister_endpoint("das"));
    assert!(runtime.get_endpoint_status("das").is_none());
    assert_eq!(runtime.registry().primary(TransportKind::Das), None);

    runtime.shutdown().await;
    runtime.shutdown().await;
    assert!(runtime.is_shutdown());

    let rejected = runtime.execute_request("getSlot", None, RequestOptions::default()).await;
    assert_eq!(rejected.unwrap_err(), UpstreamError::Shutdown);
    assert!(matches!(
        runtime.queue_request("getSlot", None, Default::default()),
        Err(UpstreamError::Shutdown)
    ));
}
