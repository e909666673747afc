//! Integration tests for health probing, primary failover and recovery.
//!
//! Probes go through a [`ScriptedTransport`] so each endpoint's answers can be flipped
//! between cycles. Cycles are driven manually with `check_all`.

use crate::mock_infrastructure::{endpoint_config, Reply, ScriptedTransport};
use ember_core::{
    metrics::MetricsCollector,
    types::TransportKind,
    upstream::{
        DirectExecutor, EndpointEvent, EndpointRegistry, HealthMonitor, HealthMonitorConfig,
        HealthPolicy, UpstreamError,
    },
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast::error::TryRecvError;

struct Fixture {
    transport: Arc<ScriptedTransport>,
    registry: Arc<EndpointRegistry>,
    monitor: HealthMonitor,
}

fn fixture(policy: HealthPolicy) -> Fixture {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_reply("a.test", Reply::Result(json!(250_000_000u64)));
    transport.set_reply("b.test", Reply::Result(json!(250_000_000u64)));

    let registry = Arc::new(EndpointRegistry::new(policy));
    registry.register_endpoint("a", endpoint_config("http://a.test", 10, 1)).unwrap();
    registry.register_endpoint("b", endpoint_config("http://b.test", 5, 1)).unwrap();

    let monitor = HealthMonitor::new(
        Arc::clone(&registry),
        Arc::new(DirectExecutor::new(transport.clone())),
        Arc::new(MetricsCollector::detached()),
        HealthMonitorConfig { probe_timeout: Duration::from_secs(1), ..HealthMonitorConfig::default() },
    );

    Fixture { transport, registry, monitor }
}

fn connection_refused() -> Reply {
    Reply::Fail(UpstreamError::ConnectionFailed("connection refused".to_string()))
}

#[tokio::test]
async fn test_primary_failover_after_threshold_and_recovery() {
    let Fixture { registry, monitor, .. } = fixture(HealthPolicy::default());
    let mut events = monitor.subscribe();

    monitor.apply_probe_success("b", 100);
    monitor.apply_probe_failure("a", "connection refused");
    monitor.apply_probe_failure("a", "connection refused");
    assert_eq!(
        registry.primary(TransportKind::Standard).as_deref(),
        Some("a"),
        "two failures stay below the failover threshold"
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    monitor.apply_probe_failure("a", "connection refused");
    assert_eq!(registry.primary(TransportKind::Standard).as_deref(), Some("b"));
    assert_eq!(
        events.try_recv().unwrap(),
        EndpointEvent::Failover { kind: TransportKind::Standard, from: "a".into(), to: "b".into() }
    );

    let a_health = registry.health("a").unwrap();
    assert!(!a_health.healthy);
    assert_eq!(a_health.consecutive_failures, 3);
    assert_eq!(a_health.last_error.as_deref(), Some("connection refused"));

    monitor.apply_probe_failure("a", "connection refused");
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)), "failover fires once");

    monitor.apply_probe_success("a", 50);
    assert_eq!(
        registry.primary(TransportKind::Standard).as_deref(),
        Some("b"),
        "one success is below the recovery threshold"
    );

    monitor.apply_probe_success("a", 50);
    assert_eq!(registry.primary(TransportKind::Standard).as_deref(), Some("a"));
    assert_eq!(
        events.try_recv().unwrap(),
        EndpointEvent::Recovery {
            kind: TransportKind::Standard,
            endpoint: "a".into(),
            replaced: Some("b".into()),
        }
    );

    let stats = monitor.stats();
    assert_eq!(stats.failovers, 1);
    assert_eq!(stats.recoveries, 1);
}

#[tokio::test]
async fn test_probe_cycles_promote_backup_and_restore_primary() {
    let Fixture { transport, registry, monitor } = fixture(HealthPolicy::default());
    let mut events = monitor.subscribe();
    transport.set_latency("b.test", Duration::from_millis(50));

    monitor.check_all().await;
    assert_eq!(registry.primary(TransportKind::Standard).as_deref(), Some("a"));

    // b reaches the recovery threshold while a is unhealthy and takes over.
    transport.set_reply("a.test", connection_refused());
    monitor.check_all().await;
    assert_eq!(registry.primary(TransportKind::Standard).as_deref(), Some("b"));
    assert_eq!(
        events.try_recv().unwrap(),
        EndpointEvent::Recovery {
            kind: TransportKind::Standard,
            endpoint: "b".into(),
            replaced: Some("a".into()),
        }
    );

    monitor.check_all().await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    let a_health = registry.health("a").unwrap();
    assert!(!a_health.healthy);
    assert_eq!(a_health.consecutive_failures, 2);
    assert!(a_health.last_error.unwrap().contains("connection refused"));

    transport.set_reply("a.test", Reply::Result(json!(250_000_001u64)));
    monitor.check_all().await;
    assert!(registry.health("a").unwrap().healthy);
    assert_eq!(registry.primary(TransportKind::Standard).as_deref(), Some("b"));

    monitor.check_all().await;
    assert_eq!(registry.primary(TransportKind::Standard).as_deref(), Some("a"));
    assert_eq!(
        events.try_recv().unwrap(),
        EndpointEvent::Recovery {
            kind: TransportKind::Standard,
            endpoint: "a".into(),
            replaced: Some("b".into()),
        }
    );

    let stats = monitor.stats();
    assert_eq!(stats.cycles, 5);
    assert_eq!(stats.probes, 10);
    assert_eq!(stats.probe_failures, 2);
    assert_eq!(stats.failovers, 0);
    assert_eq!(stats.recoveries, 2);
}

#[tokio::test]
async fn test_no_failover_without_healthy_replacement() {
    let Fixture { transport, registry, monitor } = fixture(HealthPolicy::default());
    let mut events = monitor.subscribe();
    transport.set_reply("a.test", connection_refused());
    transport.set_reply("b.test", connection_refused());

    for _ in 0..4 {
        monitor.check_all().await;
    }

    assert_eq!(registry.primary(TransportKind::Standard).as_deref(), Some("a"));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(monitor.stats().failovers, 0);
}

#[tokio::test]
async fn test_slower_challenger_does_not_displace_healthy_primary() {
    let Fixture { transport, registry, monitor } = fixture(HealthPolicy::default());
    transport.set_latency("a.test", Duration::from_millis(20));
    transport.set_latency("b.test", Duration::from_millis(60));

    for _ in 0..3 {
        monitor.check_all().await;
    }

    assert_eq!(registry.primary(TransportKind::Standard).as_deref(), Some("a"));
    assert_eq!(monitor.stats().recoveries, 0);
}

#[tokio::test]
async fn test_degraded_event_fires_once_per_transition() {
    let policy = HealthPolicy { degraded_threshold_ms: 20, ..HealthPolicy::default() };
    let Fixture { transport, registry, monitor } = fixture(policy);
    let mut events = monitor.subscribe();
    transport.set_latency("b.test", Duration::from_millis(50));

    monitor.check_all().await;
    monitor.check_all().await;

    let b_health = registry.health("b").unwrap();
    assert!(b_health.healthy);
    assert!(b_health.degraded);

    match events.try_recv().unwrap() {
        EndpointEvent::Degraded { endpoint, latency_ms } => {
            assert_eq!(endpoint, "b");
            assert!(latency_ms >= 50);
        }
        other => panic!("expected degraded event, got {other:?}"),
    }
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    transport.set_latency("b.test", Duration::ZERO);
    monitor.check_all().await;
    assert!(!registry.health("b").unwrap().degraded);
}

#[tokio::test]
async fn test_probe_uses_configured_method() {
    let Fixture { transport, monitor, .. } = fixture(HealthPolicy::default());

    monitor.check_all().await;

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert!(!call.is_batch());
        assert_eq!(call.body["method"], json!("getBlockHeight"));
    }
    assert_eq!(transport.calls_to("a.test"), 1);
    assert_eq!(transport.calls_to("b.test"), 1);
}
