//! # Ember Core
//!
//! Resilient JSON-RPC client runtime for Solana RPC providers such as Helius.
//!
//! This crate provides:
//!
//! - **[`upstream`]**: endpoint registry with per-kind primaries, weighted endpoint
//!   selection, a single-attempt executor, a health monitor driving failover and
//!   recovery, and a failover client retrying across endpoints.
//!
//! - **[`batch`]**: a batch coalescer that dedupes identical calls, drains them by
//!   priority into JSON-RPC batches behind a token bucket, and retries failed batches
//!   with backoff.
//!
//! - **[`runtime`]**: a builder and lifecycle object wiring everything from
//!   [`config::AppConfig`].
//!
//! - **[`metrics`]**: Prometheus metrics through the `metrics` facade.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           EmberRuntime                           │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────┐  │
//! │  │ FailoverClient │  │ BatchCoalescer │  │   HealthMonitor    │  │
//! │  └───────┬────────┘  └───────┬────────┘  └─────────┬──────────┘  │
//! │          │                   │ TokenBucket         │ probes      │
//! │          ▼                   ▼                     ▼             │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │      EndpointRegistry (health, stats, primary per kind)    │  │
//! │  └─────────────────────────────┬──────────────────────────────┘  │
//! │                                ▼                                 │
//! │                    RpcTransport (HttpClient)                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod batch;
pub mod config;
pub mod metrics;
pub mod runtime;
pub mod types;
pub mod upstream;
