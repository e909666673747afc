use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::upstream::errors::UpstreamError;

/// Sends one serialized JSON-RPC payload (single object or batch array) to a URL.
///
/// Implementations perform exactly one attempt. Retrying, failover and backoff are the
/// responsibility of the caller so that every attempt is accounted for in endpoint
/// health and stats.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Posts `body` to `url` and returns the raw response body on a 2xx status.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::RateLimited`] for HTTP 429
    /// - [`UpstreamError::HttpError`] for any other non-2xx status
    /// - [`UpstreamError::Timeout`] if no response arrived within `timeout`
    /// - [`UpstreamError::ConnectionFailed`] for other network failures
    async fn post(&self, url: &str, body: Bytes, timeout: Duration) -> Result<Bytes, UpstreamError>;
}
