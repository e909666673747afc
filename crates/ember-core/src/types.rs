//! Core type definitions shared by the endpoint and batching subsystems.
//!
//! # Type Categories
//!
//! ## JSON-RPC Protocol Types
//! - [`JsonRpcRequest`], [`JsonRpcResponse`], [`JsonRpcError`]: JSON-RPC 2.0 wire format,
//!   used for both single calls and batch arrays.
//!
//! ## Routing Types
//! - [`TransportKind`]: logical endpoint family (standard RPC, enhanced APIs, DAS, ...).
//! - [`Priority`]: scheduling class for queued requests in the batch coalescer.

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, str::FromStr, sync::Arc};

/// JSON-RPC protocol version constant to avoid repeated allocations.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the JSON-RPC version string.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// JSON-RPC 2.0 request structure.
///
/// `params` is kept as a raw JSON value: positional arrays and keyed objects are both
/// forwarded untouched. The `id` is wrapped in an `Arc` so that batch bookkeeping can
/// hold on to it without deep copies.
///
/// # Example
///
/// ```
/// use ember_core::types::JsonRpcRequest;
/// use serde_json::json;
///
/// let request = JsonRpcRequest::new("getBalance", Some(json!(["Vote111111111111111111111111111111111111111"])), json!(7));
/// assert_eq!(request.method, "getBalance");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }
}

/// JSON-RPC 2.0 response structure.
///
/// Contains either a `result` or an `error`. Upstreams occasionally omit `jsonrpc`, so
/// it defaults to `"2.0"` on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Arc<serde_json::Value>,
}

fn default_version() -> Cow<'static, str> {
    JSONRPC_VERSION_COW
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(result: serde_json::Value, id: Arc<serde_json::Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(code: i64, message: String, id: Arc<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
            id,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Logical family of an upstream endpoint.
///
/// Endpoints of the same kind are interchangeable for routing purposes; each kind has
/// at most one primary endpoint at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain Solana JSON-RPC.
    Standard,
    /// Provider-specific enhanced APIs (parsed transactions, webhooks management, ...).
    Enhanced,
    /// Digital Asset Standard API.
    Das,
    /// Webhook delivery endpoints.
    Webhook,
    /// Priority-fee / transaction-landing endpoints.
    Priority,
}

impl TransportKind {
    pub const ALL: [TransportKind; 5] =
        [Self::Standard, Self::Enhanced, Self::Das, Self::Webhook, Self::Priority];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Enhanced => "enhanced",
            Self::Das => "das",
            Self::Webhook => "webhook",
            Self::Priority => "priority",
        }
    }
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::Standard
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "enhanced" => Ok(Self::Enhanced),
            "das" => Ok(Self::Das),
            "webhook" => Ok(Self::Webhook),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown transport kind: {other}")),
        }
    }
}

/// Scheduling class for queued requests.
///
/// Batches drain strictly from the highest class down; `Batch` is the class used by
/// `queue_batch` and is drained last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Batch = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    /// Number of priority levels, used to size the per-priority queues.
    pub const LEVELS: usize = 5;

    /// Levels ordered from the first drained to the last drained.
    pub const DRAIN_ORDER: [Priority; Self::LEVELS] =
        [Self::Critical, Self::High, Self::Normal, Self::Low, Self::Batch];

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
