//! Core component container for the Ember runtime.

use crate::{
    batch::BatchCoalescer,
    metrics::MetricsCollector,
    upstream::{DirectExecutor, EndpointRegistry, FailoverClient, HealthMonitor},
};
use std::sync::Arc;

/// Container for all initialized runtime components.
///
/// Every component is shared behind an `Arc` and uses interior mutability, so the
/// container is cheap to clone and hand to other tasks.
#[derive(Clone)]
pub struct EmberComponents {
    metrics_collector: Arc<MetricsCollector>,
    registry: Arc<EndpointRegistry>,
    executor: Arc<DirectExecutor>,
    failover_client: Arc<FailoverClient>,
    batch_coalescer: BatchCoalescer,
    health_monitor: Arc<HealthMonitor>,
}

impl EmberComponents {
    /// Called by `EmberRuntimeBuilder` during initialization.
    #[must_use]
    pub fn new(
        metrics_collector: Arc<MetricsCollector>,
        registry: Arc<EndpointRegistry>,
        executor: Arc<DirectExecutor>,
        failover_client: Arc<FailoverClient>,
        batch_coalescer: BatchCoalescer,
        health_monitor: Arc<HealthMonitor>,
    ) -> Self {
        Self { metrics_collector, registry, executor, failover_client, batch_coalescer, health_monitor }
    }

    #[must_use]
    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics_collector
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Single-attempt executor shared by the failover client and the health monitor.
    #[must_use]
    pub fn executor(&self) -> &Arc<DirectExecutor> {
        &self.executor
    }

    #[must_use]
    pub fn failover_client(&self) -> &Arc<FailoverClient> {
        &self.failover_client
    }

    #[must_use]
    pub fn batch_coalescer(&self) -> &BatchCoalescer {
        &self.batch_coalescer
    }

    /// The monitor exists even when its background loop is disabled, so events and
    /// manual probe cycles stay available.
    #[must_use]
    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health_monitor
    }
}
