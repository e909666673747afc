//! Ember runtime initialization and lifecycle management.
//!
//! The runtime owns one endpoint registry and wires the failover client, the batch
//! coalescer and the health monitor around it. Nothing is process-global: two runtimes
//! in one process share no state.
//!
//! # Example
//!
//! ```no_run
//! use ember_core::{config::AppConfig, runtime::EmberRuntime, upstream::RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!
//!     let runtime = EmberRuntime::builder()
//!         .with_config(config)
//!         .enable_health_monitor()
//!         .build()?;
//!
//!     let slot = runtime.execute_request("getSlot", None, RequestOptions::default()).await?;
//!     println!("slot: {slot}");
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{EmberRuntimeBuilder, RuntimeError};
pub use components::EmberComponents;
pub use lifecycle::EmberRuntime;
