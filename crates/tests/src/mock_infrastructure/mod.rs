//! Mock Infrastructure for Testing the Ember RPC Client
//!
//! Reusable mock types for exercising upstream interactions without real providers.
//!
//! ## Components
//!
//! - `RpcMockBuilder`: wraps mockito with Solana JSON-RPC response helpers
//! - `ScriptedTransport`: in-memory [`RpcTransport`] with per-host scripted replies,
//!   latency and call recording
//! - Test helpers for endpoint and config fixtures
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::RpcMockBuilder;
//!
//! let mut mock = RpcMockBuilder::new().await;
//! mock.mock_method("getSlot", &json!(250_000_000));
//!
//! // Use mock.url() as an endpoint URL
//! ```
//!
//! [`RpcTransport`]: ember_core::upstream::RpcTransport

pub mod rpc_mock;
pub mod scripted_transport;
pub mod test_helpers;

pub use rpc_mock::RpcMockBuilder;
pub use scripted_transport::{RecordedCall, Reply, ScriptedTransport};
pub use test_helpers::*;
