use bytes::Bytes;
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{
    types::{JsonRpcRequest, JsonRpcResponse},
    upstream::{endpoint::Endpoint, errors::UpstreamError, transport::RpcTransport},
};

/// Outcome of a successful call.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: Value,
    pub latency: Duration,
}

impl Execution {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn latency_ms(&self) -> u64 {
        self.latency.as_millis() as u64
    }
}

/// Performs exactly one JSON-RPC call against one endpoint.
///
/// No retries and no bookkeeping: the caller decides what the outcome means for the
/// endpoint's health and stats.
pub struct DirectExecutor {
    transport: Arc<dyn RpcTransport>,
    next_id: AtomicU64,
}

impl DirectExecutor {
    #[must_use]
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport, next_id: AtomicU64::new(1) }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    /// Calls `method` on `endpoint`, failing with [`UpstreamError::Timeout`] if no answer
    /// arrives within `timeout`.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::RpcError`] if the response carries an `error` object
    /// - [`UpstreamError::InvalidResponse`] if the body is not a JSON-RPC response
    /// - any transport error from [`RpcTransport::post`]
    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Execution, UpstreamError> {
        self.execute_url(endpoint.request_url(), method, params, timeout).await
    }

    /// Same as [`execute`](Self::execute) against a raw URL.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn execute_url(
        &self,
        url: &str,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Execution, UpstreamError> {
        if method.is_empty() {
            return Err(UpstreamError::InvalidRequest("method is empty".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(method, params, Value::from(id));
        let body = serde_json::to_vec(&request).map_err(|e| {
            UpstreamError::InvalidRequest(format!("Failed to serialize request: {e}"))
        })?;

        let start = Instant::now();
        let bytes = tokio::time::timeout(timeout, self.transport.post(url, Bytes::from(body), timeout))
            .await
            .map_err(|_| UpstreamError::Timeout)??;
        let latency = start.elapsed();

        let response: JsonRpcResponse = serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::InvalidResponse(format!("Invalid JSON: {e}")))?;

        if let Some(error) = response.error {
            return Err(UpstreamError::RpcError(error.code, error.message));
        }

        let execution = Execution { result: response.result.unwrap_or(Value::Null), latency };
        tracing::debug!(method, latency_ms = execution.latency_ms(), "rpc call completed");
        Ok(execution)
    }
}
