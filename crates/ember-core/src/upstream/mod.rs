//! Upstream endpoint management and resilient request execution.
//!
//! - [`registry`]: endpoints, health, stats and the primary endpoint per transport kind
//! - [`selector`]: priority, latency and weighted-random endpoint selection
//! - [`executor`]: one JSON-RPC call against one endpoint with a timeout
//! - [`health`]: periodic probing that drives primary failover and recovery
//! - [`failover`]: retries a call across distinct endpoints with exponential backoff
//!
//! ## Request Flow
//!
//! ```text
//! execute_request
//!       │
//!       ▼
//! ┌──────────────┐  none left   ┌──────────────────────────┐
//! │   Selector   │ ───────────► │ NoHealthyEndpoint / last │
//! └──────┬───────┘              │ observed error           │
//!        │ endpoint             └──────────────────────────┘
//!        ▼
//! ┌──────────────┐   failure    ┌──────────────────────────┐
//! │   Executor   │ ───────────► │ record failure, exclude, │
//! └──────┬───────┘              │ back off, next attempt   │
//!        │ success              └──────────────────────────┘
//!        ▼
//!  record success, return result
//! ```

pub mod endpoint;
pub mod errors;
pub mod executor;
pub mod failover;
pub mod health;
pub mod http_client;
pub mod registry;
pub mod selector;
pub mod transport;

pub use endpoint::{Endpoint, EndpointConfig, EndpointStats, EndpointStatus, HealthStatus};
pub use errors::{ErrorClass, UpstreamError};
pub use executor::{DirectExecutor, Execution};
pub use failover::{FailoverClient, FailoverConfig, FailoverStats, RequestOptions};
pub use health::{HealthMonitor, HealthMonitorConfig, HealthMonitorStats};
pub use http_client::{HttpClient, HttpClientConfig};
pub use registry::{EndpointEvent, EndpointRegistry, HealthPolicy};
pub use selector::SelectOptions;
pub use transport::RpcTransport;
