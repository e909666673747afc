use futures::future::join_all;
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, time::interval};
use tracing::{debug, info, warn};

use crate::{
    metrics::MetricsCollector,
    upstream::{
        errors::UpstreamError,
        executor::DirectExecutor,
        registry::{EndpointEvent, EndpointRegistry},
    },
};

/// Capacity of the event channel; slow subscribers see `Lagged` rather than blocking.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Probe settings for the health monitor.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub probe_method: String,
    pub probe_timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_method: "getBlockHeight".to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters describing health monitor activity.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct HealthMonitorStats {
    pub cycles: u64,
    pub probes: u64,
    pub probe_failures: u64,
    pub failovers: u64,
    pub recoveries: u64,
}

#[derive(Default)]
struct MonitorCounters {
    cycles: AtomicU64,
    probes: AtomicU64,
    probe_failures: AtomicU64,
    failovers: AtomicU64,
    recoveries: AtomicU64,
}

/// Periodically probes every registered endpoint and drives primary failover and
/// recovery through the [`EndpointRegistry`].
///
/// Events are published on a broadcast channel; see [`HealthMonitor::subscribe`].
pub struct HealthMonitor {
    registry: Arc<EndpointRegistry>,
    executor: Arc<DirectExecutor>,
    metrics_collector: Arc<MetricsCollector>,
    config: HealthMonitorConfig,
    events: broadcast::Sender<EndpointEvent>,
    counters: MonitorCounters,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        registry: Arc<EndpointRegistry>,
        executor: Arc<DirectExecutor>,
        metrics_collector: Arc<MetricsCollector>,
        config: HealthMonitorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            executor,
            metrics_collector,
            config,
            events,
            counters: MonitorCounters::default(),
        }
    }

    /// Subscribes to failover, recovery and degradation events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EndpointEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> HealthMonitorStats {
        HealthMonitorStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            probes: self.counters.probes.load(Ordering::Relaxed),
            probe_failures: self.counters.probe_failures.load(Ordering::Relaxed),
            failovers: self.counters.failovers.load(Ordering::Relaxed),
            recoveries: self.counters.recoveries.load(Ordering::Relaxed),
        }
    }

    /// Spawns the periodic probe loop, which runs until `shutdown_rx` fires.
    ///
    /// The first cycle runs immediately.
    #[must_use]
    pub fn start_with_shutdown(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = interval(monitor.config.check_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        monitor.check_all().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("health monitor shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Probes every registered endpoint concurrently, one probe per endpoint.
    pub async fn check_all(&self) {
        let endpoints = self.registry.endpoints();
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);

        let results =
            join_all(endpoints.iter().map(|endpoint| self.check_endpoint_health(&endpoint.id))).await;
        let healthy = results.into_iter().filter(|r| matches!(r, Ok(true))).count();

        self.metrics_collector.record_healthy_endpoint_count(healthy);
        debug!(endpoints = endpoints.len(), healthy, "health check cycle completed");
    }

    /// Probes one endpoint and applies the outcome.
    ///
    /// Returns whether the probe succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::UnknownEndpoint`] if `id` is not registered.
    pub async fn check_endpoint_health(&self, id: &str) -> Result<bool, UpstreamError> {
        let endpoint =
            self.registry.endpoint(id).ok_or_else(|| UpstreamError::UnknownEndpoint(id.to_string()))?;
        self.counters.probes.fetch_add(1, Ordering::Relaxed);

        let outcome = self
            .executor
            .execute(&endpoint, &self.config.probe_method, None, self.config.probe_timeout)
            .await;

        match outcome {
            Ok(execution) => {
                let latency_ms = execution.latency_ms();
                self.metrics_collector.record_health_check(id, true, latency_ms);
                debug!(endpoint = %id, latency_ms, "health check passed");
                self.apply_probe_success(id, latency_ms);
                Ok(true)
            }
            Err(e) => {
                self.counters.probe_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics_collector.record_health_check(
                    id,
                    false,
                    u64::try_from(self.config.probe_timeout.as_millis()).unwrap_or(u64::MAX),
                );
                warn!(endpoint = %id, error = %e, "health check failed");
                self.apply_probe_failure(id, &e.to_string());
                Ok(false)
            }
        }
    }

    /// Applies a successful probe result as if it had been observed by a probe.
    pub fn apply_probe_success(&self, id: &str, latency_ms: u64) {
        let events = self.registry.apply_probe_success(id, latency_ms);
        self.after_probe(id, events);
    }

    /// Applies a failed probe result as if it had been observed by a probe.
    pub fn apply_probe_failure(&self, id: &str, error: &str) {
        let events = self.registry.apply_probe_failure(id, error);
        self.after_probe(id, events);
    }

    fn after_probe(&self, id: &str, events: Vec<EndpointEvent>) {
        if let Some(health) = self.registry.health(id) {
            self.metrics_collector.record_endpoint_health(id, &health);
        }
        for event in events {
            match &event {
                EndpointEvent::Failover { kind, .. } => {
                    self.counters.failovers.fetch_add(1, Ordering::Relaxed);
                    self.metrics_collector.record_failover(*kind);
                }
                EndpointEvent::Recovery { kind, .. } => {
                    self.counters.recoveries.fetch_add(1, Ordering::Relaxed);
                    self.metrics_collector.record_recovery(*kind);
                }
                EndpointEvent::Degraded { .. } => {}
            }
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}
