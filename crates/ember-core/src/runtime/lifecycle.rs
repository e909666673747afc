//! Runtime lifecycle: the public request API, background tasks and graceful shutdown.

use crate::{
    batch::{BatchRequest, BatcherStats, QueueBatchOptions, QueueOptions, RequestHandle},
    config::AppConfig,
    metrics::MetricsCollector,
    upstream::{
        errors::UpstreamError, Endpoint, EndpointConfig, EndpointEvent, EndpointRegistry,
        EndpointStatus, FailoverStats, HealthMonitorStats, RequestOptions,
    },
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{builder::EmberRuntimeBuilder, EmberComponents};

/// Main runtime container: owns the components and their background tasks.
///
/// All request methods take `&self`, so the runtime can be shared behind an `Arc`.
/// After [`shutdown`](Self::shutdown) every request method fails with
/// [`UpstreamError::Shutdown`].
pub struct EmberRuntime {
    components: EmberComponents,
    shutdown_tx: broadcast::Sender<()>,
    config: AppConfig,
    health_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_initiated: AtomicBool,
}

impl EmberRuntime {
    #[must_use]
    pub fn builder() -> EmberRuntimeBuilder {
        EmberRuntimeBuilder::new()
    }

    pub(super) fn new(
        components: EmberComponents,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        enable_health_monitor: bool,
    ) -> Self {
        let health_task = if enable_health_monitor {
            let handle = components.health_monitor().start_with_shutdown(shutdown_tx.subscribe());
            debug!("health monitor task started");
            Some(handle)
        } else {
            None
        };

        Self {
            components,
            shutdown_tx,
            config,
            health_task: Mutex::new(health_task),
            shutdown_initiated: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn components(&self) -> &EmberComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        self.components.registry()
    }

    #[must_use]
    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        self.components.metrics_collector()
    }

    fn ensure_running(&self) -> Result<(), UpstreamError> {
        if self.shutdown_initiated.load(Ordering::Acquire) {
            Err(UpstreamError::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Runs one call through the failover client.
    ///
    /// # Errors
    ///
    /// See [`FailoverClient::execute_request`](crate::upstream::FailoverClient::execute_request).
    pub async fn execute_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, UpstreamError> {
        self.ensure_running()?;
        self.components.failover_client().execute_request(method, params, options).await
    }

    /// Queues one call on the batch coalescer.
    ///
    /// # Errors
    ///
    /// See [`BatchCoalescer::queue_request`](crate::batch::BatchCoalescer::queue_request).
    pub fn queue_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: QueueOptions,
    ) -> Result<RequestHandle, UpstreamError> {
        self.ensure_running()?;
        self.components.batch_coalescer().queue_request(method, params, options)
    }

    /// Queues a group of calls at batch priority and waits for all of them.
    ///
    /// # Errors
    ///
    /// See [`BatchCoalescer::queue_batch`](crate::batch::BatchCoalescer::queue_batch).
    pub async fn queue_batch(
        &self,
        requests: Vec<BatchRequest>,
        options: QueueBatchOptions,
    ) -> Result<Vec<Result<Value, UpstreamError>>, UpstreamError> {
        self.ensure_running()?;
        self.components.batch_coalescer().queue_batch(requests, options).await
    }

    /// Sends one call immediately, bypassing the batch queue.
    ///
    /// # Errors
    ///
    /// Any error of the single attempt.
    pub async fn execute_immediate(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, UpstreamError> {
        self.ensure_running()?;
        self.components.batch_coalescer().execute_immediate(method, params).await
    }

    /// Adds or replaces an endpoint at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidEndpoint`] if the id or URL is rejected.
    pub fn register_endpoint(
        &self,
        id: &str,
        config: EndpointConfig,
    ) -> Result<Arc<Endpoint>, UpstreamError> {
        self.components.registry().register_endpoint(id, config)
    }

    pub fn unregister_endpoint(&self, id: &str) -> bool {
        self.components.registry().unregister_endpoint(id)
    }

    #[must_use]
    pub fn get_endpoint_status(&self, id: &str) -> Option<EndpointStatus> {
        self.components.registry().get_endpoint_status(id)
    }

    #[must_use]
    pub fn get_all_endpoints_status(&self) -> Vec<EndpointStatus> {
        self.components.registry().get_all_endpoints_status()
    }

    #[must_use]
    pub fn get_failover_stats(&self) -> FailoverStats {
        self.components.failover_client().stats()
    }

    #[must_use]
    pub fn get_batcher_stats(&self) -> BatcherStats {
        self.components.batch_coalescer().stats()
    }

    #[must_use]
    pub fn get_health_stats(&self) -> HealthMonitorStats {
        self.components.health_monitor().stats()
    }

    /// Subscribes to failover, recovery and degradation events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EndpointEvent> {
        self.components.health_monitor().subscribe()
    }

    /// Runs one probe cycle now, independent of the background loop.
    pub async fn check_health(&self) {
        self.components.health_monitor().check_all().await;
    }

    /// Prometheus exposition text, empty when metrics are disabled.
    #[must_use]
    pub fn prometheus_metrics(&self) -> String {
        self.components.metrics_collector().get_prometheus_metrics()
    }

    /// Creates a receiver that fires when shutdown begins.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    #[must_use]
    pub fn has_health_task(&self) -> bool {
        self.health_task.lock().is_some()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Stops the health monitor, completes every queued call with
    /// [`UpstreamError::Shutdown`] and rejects further requests. Idempotent.
    pub async fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("initiating ember runtime shutdown");
        if let Err(e) = self.shutdown_tx.send(()) {
            debug!(error = %e, "shutdown signal had no receivers");
        }

        self.components.batch_coalescer().shutdown();

        let health_task = self.health_task.lock().take();
        if let Some(health_task) = health_task {
            health_task.abort();
            match health_task.await {
                Err(e) if !e.is_cancelled() => warn!(error = %e, "health monitor task failed"),
                _ => debug!("health monitor task stopped"),
            }
        }

        info!("ember runtime shutdown complete");
    }

    /// Waits for a shutdown signal from [`shutdown_receiver`](Self::shutdown_receiver)
    /// holders, then performs cleanup.
    pub async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("shutdown signal received, runtime terminating");
        self.shutdown().await;
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<EmberRuntime>;
    let _ = assert_sync::<EmberRuntime>;
};
