//! Builder for initializing the Ember runtime with configurable components.

use crate::{
    batch::{BatchCoalescer, BatchRoute},
    config::AppConfig,
    metrics::MetricsCollector,
    upstream::{
        errors::UpstreamError, DirectExecutor, EndpointRegistry, FailoverClient, HealthMonitor,
        HttpClient, RpcTransport,
    },
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{lifecycle::EmberRuntime, EmberComponents};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A configured endpoint was rejected by the registry
    #[error("Invalid endpoint '{id}': {source}")]
    InvalidEndpoint {
        id: String,
        #[source]
        source: UpstreamError,
    },

    /// HTTP transport construction failed
    #[error("Failed to initialize HTTP transport: {0}")]
    Transport(#[source] UpstreamError),
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_health_monitor: bool,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_health_monitor: false, shutdown_channel_capacity: 16 }
    }
}

/// Builder for constructing an [`EmberRuntime`].
///
/// # Examples
///
/// ```no_run
/// # use ember_core::{config::AppConfig, runtime::EmberRuntimeBuilder};
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::load()?;
///
/// let runtime = EmberRuntimeBuilder::new()
///     .with_config(config)
///     .enable_health_monitor()
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct EmberRuntimeBuilder {
    config: Option<AppConfig>,
    transport: Option<Arc<dyn RpcTransport>>,
    metrics_collector: Option<Arc<MetricsCollector>>,
    options: RuntimeOptions,
}

impl EmberRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
            metrics_collector: None,
            options: RuntimeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the default [`HttpClient`] transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn RpcTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses `collector` instead of one derived from `metrics.enabled`.
    #[must_use]
    pub fn with_metrics_collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.metrics_collector = Some(collector);
        self
    }

    /// Starts the periodic health probe loop when the runtime is built.
    #[must_use]
    pub fn enable_health_monitor(mut self) -> Self {
        self.options.enable_health_monitor = true;
        self
    }

    #[must_use]
    pub fn disable_health_monitor(mut self) -> Self {
        self.options.enable_health_monitor = false;
        self
    }

    /// Sets custom shutdown channel capacity (default: 16).
    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity.max(1);
        self
    }

    /// Builds the runtime, registering every configured endpoint and starting the
    /// background tasks.
    ///
    /// Must be called from within a Tokio runtime when the health monitor is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the configuration is missing or invalid, an endpoint
    /// is rejected, or the HTTP transport cannot be created.
    pub fn build(self) -> Result<EmberRuntime, RuntimeError> {
        let config = self.config.ok_or_else(|| {
            RuntimeError::ConfigValidation("No configuration provided".to_string())
        })?;

        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            endpoints_count = config.endpoints.len(),
            health_monitor_enabled = self.options.enable_health_monitor,
            batch_endpoint = config.batch.endpoint_url.as_deref().unwrap_or("selector"),
            "initializing ember runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);

        let metrics_collector = self.metrics_collector.unwrap_or_else(|| {
            Arc::new(if config.metrics.enabled {
                MetricsCollector::new()
            } else {
                MetricsCollector::detached()
            })
        });

        let transport: Arc<dyn RpcTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpClient::with_config(config.http_client_config())
                    .map_err(RuntimeError::Transport)?,
            ),
        };

        let registry = Arc::new(EndpointRegistry::new(config.health_policy()));
        for endpoint in &config.endpoints {
            registry
                .register_endpoint(&endpoint.id, endpoint.to_endpoint_config())
                .map_err(|source| RuntimeError::InvalidEndpoint { id: endpoint.id.clone(), source })?;
        }
        debug!(endpoints = registry.len(), "endpoint registry initialized");

        let executor = Arc::new(DirectExecutor::new(Arc::clone(&transport)));

        let failover_client = Arc::new(FailoverClient::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            Arc::clone(&metrics_collector),
            config.failover_config(),
        ));
        debug!("failover client initialized");

        let route = match &config.batch.endpoint_url {
            Some(url) => BatchRoute::Fixed(url.clone()),
            None => BatchRoute::Registry {
                registry: Arc::clone(&registry),
                kind: config.batch.transport_kind,
            },
        };
        let batch_coalescer = BatchCoalescer::new(
            config.batch_config(),
            route,
            Arc::clone(&transport),
            Arc::clone(&metrics_collector),
        );
        debug!("batch coalescer initialized");

        let health_monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            Arc::clone(&metrics_collector),
            config.health_monitor_config(),
        ));

        let components = EmberComponents::new(
            metrics_collector,
            registry,
            executor,
            failover_client,
            batch_coalescer,
            health_monitor,
        );
        let runtime =
            EmberRuntime::new(components, shutdown_tx, config, self.options.enable_health_monitor);

        info!("ember runtime initialization complete");

        Ok(runtime)
    }
}

impl Default for EmberRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
