//! Endpoint registry: the bookkeeping half of endpoint resilience.
//!
//! Endpoints, their [`HealthStatus`], their [`EndpointStats`] and the primary assignment
//! per [`TransportKind`] live behind a single lock so that health transitions and primary
//! changes are always observed together. No network I/O happens here; probes and
//! requests are executed elsewhere and their outcomes are applied through the
//! `apply_*` and `record_*` methods.

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};

use crate::{
    types::TransportKind,
    upstream::{
        endpoint::{Endpoint, EndpointConfig, EndpointStats, EndpointStatus, HealthStatus},
        errors::UpstreamError,
        selector::{self, Candidate, SelectOptions},
    },
};

/// Thresholds driving health transitions and primary reassignment.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    /// Consecutive failures after which an endpoint is considered for failover.
    pub failover_threshold: u32,
    /// Consecutive probe successes required before an endpoint may reclaim primary.
    pub recovery_threshold: u32,
    /// Latency above which a healthy endpoint is flagged as degraded.
    pub degraded_threshold_ms: u64,
    /// A challenger must be at most this fraction of the primary's latency to take over
    /// a healthy primary.
    pub recovery_latency_ratio: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failover_threshold: 3,
            recovery_threshold: 2,
            degraded_threshold_ms: 1000,
            recovery_latency_ratio: 0.8,
        }
    }
}

/// State change published by the registry and the health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointEvent {
    /// The primary for `kind` failed and was replaced.
    Failover { kind: TransportKind, from: String, to: String },
    /// `endpoint` recovered and was promoted to primary, replacing `replaced` if any.
    Recovery { kind: TransportKind, endpoint: String, replaced: Option<String> },
    /// A healthy endpoint crossed the degraded latency threshold.
    Degraded { endpoint: String, latency_ms: u64 },
}

struct EndpointEntry {
    endpoint: Arc<Endpoint>,
    health: HealthStatus,
    stats: EndpointStats,
}

#[derive(Default)]
struct RegistryState {
    endpoints: HashMap<String, EndpointEntry>,
    primaries: HashMap<TransportKind, String>,
}

impl RegistryState {
    fn candidates(&self) -> Vec<Candidate<'_>> {
        self.endpoints
            .values()
            .map(|entry| Candidate { endpoint: &entry.endpoint, health: &entry.health })
            .collect()
    }

    fn select(&self, kind: TransportKind, options: &SelectOptions) -> Option<Arc<Endpoint>> {
        selector::select(&self.candidates(), kind, options, &mut rand::rng())
    }

    /// Picks a healthy replacement primary of the same kind.
    fn select_primary(&self, kind: TransportKind, exclude: Option<&str>) -> Option<Arc<Endpoint>> {
        let mut options = SelectOptions::default().without_cross_kind_fallback();
        if let Some(id) = exclude {
            options = options.exclude(id);
        }
        self.select(kind, &options)
    }

    fn is_primary(&self, id: &str, kind: TransportKind) -> bool {
        self.primaries.get(&kind).is_some_and(|primary| primary == id)
    }

    fn remove(&mut self, id: &str) -> Option<EndpointEntry> {
        let entry = self.endpoints.remove(id)?;
        let kind = entry.endpoint.transport_kind;
        if self.is_primary(id, kind) {
            match self.select_primary(kind, None) {
                Some(next) => {
                    tracing::info!(kind = %kind, endpoint = %next.id, "primary reassigned after removal");
                    self.primaries.insert(kind, next.id.clone());
                }
                None => {
                    tracing::warn!(kind = %kind, "no eligible primary after removal");
                    self.primaries.remove(&kind);
                }
            }
        }
        Some(entry)
    }
}

/// Registry of upstream endpoints with health, stats and primary assignment.
pub struct EndpointRegistry {
    state: RwLock<RegistryState>,
    policy: HealthPolicy,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(HealthPolicy::default())
    }
}

impl EndpointRegistry {
    #[must_use]
    pub fn new(policy: HealthPolicy) -> Self {
        Self { state: RwLock::new(RegistryState::default()), policy }
    }

    #[must_use]
    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Registers (or re-registers) an endpoint under `id`.
    ///
    /// The endpoint starts healthy with zeroed stats. If no primary exists for its kind
    /// yet, it becomes the primary. Re-registering under the same kind keeps the
    /// current primary assignment.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidEndpoint`] if the id or URL is invalid.
    pub fn register_endpoint(
        &self,
        id: impl Into<String>,
        config: EndpointConfig,
    ) -> Result<Arc<Endpoint>, UpstreamError> {
        let endpoint = Arc::new(Endpoint::new(id, config)?);
        let kind = endpoint.transport_kind;

        let mut state = self.state.write();
        let previous_kind =
            state.endpoints.get(&endpoint.id).map(|entry| entry.endpoint.transport_kind);
        if let Some(previous_kind) = previous_kind {
            tracing::debug!(endpoint = %endpoint.id, "re-registering endpoint");
            // Same kind replaces in place and keeps any primary assignment.
            if previous_kind != kind {
                state.remove(&endpoint.id);
            }
        }
        state.endpoints.insert(
            endpoint.id.clone(),
            EndpointEntry {
                endpoint: Arc::clone(&endpoint),
                health: HealthStatus::default(),
                stats: EndpointStats::default(),
            },
        );
        let became_primary = !state.primaries.contains_key(&kind);
        if became_primary {
            state.primaries.insert(kind, endpoint.id.clone());
        }
        drop(state);

        tracing::info!(
            endpoint = %endpoint.id,
            kind = %kind,
            priority = endpoint.priority,
            weight = endpoint.weight,
            staked = endpoint.staked,
            primary = became_primary,
            "registered endpoint"
        );
        Ok(endpoint)
    }

    /// Removes an endpoint and its health and stats. If it was a primary, a healthy
    /// replacement of the same kind is selected, or the assignment is cleared.
    ///
    /// Returns `false` if the id was not registered.
    pub fn unregister_endpoint(&self, id: &str) -> bool {
        let removed = self.state.write().remove(id).is_some();
        if removed {
            tracing::info!(endpoint = %id, "unregistered endpoint");
        }
        removed
    }

    /// Selects an endpoint of `kind` according to `options`.
    #[must_use]
    pub fn select_endpoint(
        &self,
        kind: TransportKind,
        options: &SelectOptions,
    ) -> Option<Arc<Endpoint>> {
        self.state.read().select(kind, options)
    }

    #[must_use]
    pub fn endpoint(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.state.read().endpoints.get(id).map(|entry| Arc::clone(&entry.endpoint))
    }

    #[must_use]
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        let mut endpoints: Vec<_> =
            self.state.read().endpoints.values().map(|e| Arc::clone(&e.endpoint)).collect();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        endpoints
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().endpoints.is_empty()
    }

    /// Current primary endpoint id for `kind`.
    #[must_use]
    pub fn primary(&self, kind: TransportKind) -> Option<String> {
        self.state.read().primaries.get(&kind).cloned()
    }

    #[must_use]
    pub fn primary_endpoint(&self, kind: TransportKind) -> Option<Arc<Endpoint>> {
        let state = self.state.read();
        let id = state.primaries.get(&kind)?;
        state.endpoints.get(id).map(|entry| Arc::clone(&entry.endpoint))
    }

    #[must_use]
    pub fn health(&self, id: &str) -> Option<HealthStatus> {
        self.state.read().endpoints.get(id).map(|entry| entry.health.clone())
    }

    #[must_use]
    pub fn get_endpoint_status(&self, id: &str) -> Option<EndpointStatus> {
        let state = self.state.read();
        let entry = state.endpoints.get(id)?;
        Some(EndpointStatus {
            endpoint: (*entry.endpoint).clone(),
            health: entry.health.clone(),
            stats: entry.stats.clone(),
            is_primary: state.is_primary(id, entry.endpoint.transport_kind),
        })
    }

    /// Snapshots every endpoint, ordered by id.
    #[must_use]
    pub fn get_all_endpoints_status(&self) -> Vec<EndpointStatus> {
        let state = self.state.read();
        let mut statuses: Vec<_> = state
            .endpoints
            .iter()
            .map(|(id, entry)| EndpointStatus {
                endpoint: (*entry.endpoint).clone(),
                health: entry.health.clone(),
                stats: entry.stats.clone(),
                is_primary: state.is_primary(id, entry.endpoint.transport_kind),
            })
            .collect();
        statuses.sort_by(|a, b| a.endpoint.id.cmp(&b.endpoint.id));
        statuses
    }

    /// Applies a successful probe and returns any resulting events.
    ///
    /// Once an endpoint with positive priority has `recovery_threshold` consecutive
    /// successes it is promoted to primary if the current primary is missing or
    /// unhealthy, or if its latency is at most `recovery_latency_ratio` of the primary's.
    pub fn apply_probe_success(&self, id: &str, latency_ms: u64) -> Vec<EndpointEvent> {
        let mut events = Vec::new();
        let mut state = self.state.write();

        let Some(entry) = state.endpoints.get_mut(id) else {
            return events;
        };
        let was_degraded = entry.health.degraded;
        let health = &mut entry.health;
        health.healthy = true;
        health.last_check = Some(Utc::now());
        health.latency_ms = Some(latency_ms);
        health.consecutive_failures = 0;
        health.consecutive_successes = health.consecutive_successes.saturating_add(1);
        health.last_error = None;
        health.degraded = latency_ms > self.policy.degraded_threshold_ms;

        if health.degraded && !was_degraded {
            tracing::warn!(endpoint = %id, latency_ms, "endpoint degraded");
            events.push(EndpointEvent::Degraded { endpoint: id.to_string(), latency_ms });
        }

        let successes = health.consecutive_successes;
        let kind = entry.endpoint.transport_kind;
        let priority = entry.endpoint.priority;

        if successes < self.policy.recovery_threshold ||
            priority <= 0 ||
            state.is_primary(id, kind)
        {
            return events;
        }

        let current = state.primaries.get(&kind).cloned();
        let current_health = current.as_ref().and_then(|p| state.endpoints.get(p)).map(|e| &e.health);

        let promote = match current_health {
            None => true,
            Some(primary) if !primary.healthy => true,
            Some(primary) => primary.latency_ms.is_some_and(|primary_latency| {
                #[allow(clippy::cast_precision_loss)]
                let limit = primary_latency as f64 * self.policy.recovery_latency_ratio;
                #[allow(clippy::cast_precision_loss)]
                let challenger = latency_ms as f64;
                challenger <= limit
            }),
        };

        if promote {
            state.primaries.insert(kind, id.to_string());
            tracing::info!(
                kind = %kind,
                endpoint = %id,
                replaced = ?current,
                latency_ms,
                "endpoint recovered and promoted to primary"
            );
            events.push(EndpointEvent::Recovery {
                kind,
                endpoint: id.to_string(),
                replaced: current,
            });
        }

        events
    }

    /// Applies a failed probe and returns any resulting events.
    ///
    /// When the current primary reaches `failover_threshold` consecutive failures a
    /// healthy replacement of the same kind is promoted.
    pub fn apply_probe_failure(&self, id: &str, error: &str) -> Vec<EndpointEvent> {
        let mut state = self.state.write();

        let Some(entry) = state.endpoints.get_mut(id) else {
            return Vec::new();
        };
        let health = &mut entry.health;
        health.healthy = false;
        health.last_check = Some(Utc::now());
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.consecutive_successes = 0;
        health.last_error = Some(error.to_string());

        let failures = health.consecutive_failures;
        let kind = entry.endpoint.transport_kind;

        if failures < self.policy.failover_threshold || !state.is_primary(id, kind) {
            return Vec::new();
        }

        match state.select_primary(kind, Some(id)) {
            Some(next) if next.id != id => {
                state.primaries.insert(kind, next.id.clone());
                tracing::info!(
                    kind = %kind,
                    from = %id,
                    to = %next.id,
                    consecutive_failures = failures,
                    "primary failover"
                );
                vec![EndpointEvent::Failover { kind, from: id.to_string(), to: next.id.clone() }]
            }
            _ => {
                tracing::warn!(
                    kind = %kind,
                    endpoint = %id,
                    consecutive_failures = failures,
                    "primary failing but no healthy replacement available"
                );
                Vec::new()
            }
        }
    }

    /// Records a successful request executed on the request path.
    pub fn record_request_success(&self, id: &str, latency_ms: u64) {
        let mut state = self.state.write();
        if let Some(entry) = state.endpoints.get_mut(id) {
            entry.stats.record_success(latency_ms);
            entry.health.consecutive_failures = 0;
            entry.health.healthy = true;
        }
    }

    /// Records a failed request executed on the request path.
    ///
    /// Only errors attributable to the endpoint are recorded. The endpoint is marked
    /// unhealthy once it reaches `failover_threshold` consecutive failures; primary
    /// reassignment is left to the next health check.
    pub fn record_request_failure(&self, id: &str, error: &UpstreamError) {
        if !error.is_endpoint_fault() {
            return;
        }
        let mut state = self.state.write();
        if let Some(entry) = state.endpoints.get_mut(id) {
            entry.stats.record_failure(error.is_rate_limit());
            let health = &mut entry.health;
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            health.consecutive_successes = 0;
            health.last_error = Some(error.to_string());
            if health.consecutive_failures >= self.policy.failover_threshold && health.healthy {
                health.healthy = false;
                tracing::warn!(
                    endpoint = %id,
                    consecutive_failures = health.consecutive_failures,
                    "endpoint marked unhealthy after request failures"
                );
            }
        }
    }
}
