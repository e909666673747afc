use std::time::Duration;

use thiserror::Error;

use crate::types::TransportKind;

/// Coarse classification of an [`UpstreamError`].
///
/// Used for metric labels and to decide how an outcome is accounted:
/// - Connectivity, protocol and RPC errors are recorded against the endpoint that produced them
/// - Rate limits are recorded as failures and additionally counted as rate-limit hits
/// - Queue, timeout and client errors never touch endpoint health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Network failure or timeout reaching an endpoint.
    Connectivity,
    /// Non-2xx HTTP status other than 429, or an unparseable body.
    Protocol,
    /// The JSON-RPC response carried an `error` object.
    Rpc,
    /// HTTP 429.
    RateLimit,
    /// No endpoint was eligible for the requested kind.
    NoHealthyEndpoint,
    /// The batch coalescer is at capacity.
    QueueFull,
    /// A queued request was not resolved in time.
    RequestTimeout,
    /// The caller supplied something unusable.
    Client,
    /// The runtime is shutting down or lost track of a request.
    Internal,
}

impl ErrorClass {
    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connectivity => "connectivity",
            Self::Protocol => "protocol",
            Self::Rpc => "rpc",
            Self::RateLimit => "rate_limit",
            Self::NoHealthyEndpoint => "no_healthy_endpoint",
            Self::QueueFull => "queue_full",
            Self::RequestTimeout => "request_timeout",
            Self::Client => "client",
            Self::Internal => "internal",
        }
    }
}

/// Errors that can occur when executing requests against upstream endpoints.
///
/// The type is `Clone` so that a single batch outcome can be delivered to every waiter
/// attached to a deduplicated request.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded the configured timeout duration.
    #[error("Request timeout")]
    Timeout,

    /// Failed to establish a connection to the upstream endpoint.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level error occurred (non-2xx status code other than 429).
    ///
    /// First field is the HTTP status code, second is the error message.
    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    /// JSON-RPC error returned by the upstream provider.
    ///
    /// First field is the RPC error code, second is the error message.
    #[error("RPC error {0}: {1}")]
    RpcError(i64, String),

    /// The upstream answered with HTTP 429.
    #[error("Rate limited by upstream")]
    RateLimited,

    /// Response from upstream could not be parsed or was malformed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A batch response did not contain an entry for this request id.
    #[error("No response for request id {0}")]
    MissingResponse(u64),

    /// Every endpoint eligible for the kind is unhealthy or has already been tried.
    #[error("No healthy endpoint available for {0}")]
    NoHealthyEndpoint(TransportKind),

    /// The batch coalescer has reached its pending request limit.
    #[error("Request queue full ({max_pending} pending)")]
    QueueFull { max_pending: usize },

    /// A queued request did not complete before its deadline.
    #[error("Request timed out after {0:?} in queue")]
    RequestTimeout(Duration),

    /// Request validation failed before being sent to upstream.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Endpoint registration was rejected.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The referenced endpoint id is not registered.
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// The component was shut down before the request completed.
    #[error("Shutting down")]
    Shutdown,
}

impl UpstreamError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout | Self::ConnectionFailed(_) => ErrorClass::Connectivity,
            Self::HttpError(..) | Self::InvalidResponse(_) | Self::MissingResponse(_) => {
                ErrorClass::Protocol
            }
            Self::RpcError(..) => ErrorClass::Rpc,
            Self::RateLimited => ErrorClass::RateLimit,
            Self::NoHealthyEndpoint(_) => ErrorClass::NoHealthyEndpoint,
            Self::QueueFull { .. } => ErrorClass::QueueFull,
            Self::RequestTimeout(_) => ErrorClass::RequestTimeout,
            Self::InvalidRequest(_) | Self::InvalidEndpoint(_) | Self::UnknownEndpoint(_) => {
                ErrorClass::Client
            }
            Self::Shutdown => ErrorClass::Internal,
        }
    }

    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        self.class().as_str()
    }

    /// Returns `true` if another attempt could change the outcome.
    ///
    /// Errors raised before any network call (queue full, no eligible endpoint, bad input,
    /// shutdown) are surfaced to the caller immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::NoHealthyEndpoint(_) |
                Self::QueueFull { .. } |
                Self::InvalidRequest(_) |
                Self::InvalidEndpoint(_) |
                Self::UnknownEndpoint(_) |
                Self::Shutdown
        )
    }

    /// Returns `true` if this error was produced by talking to an endpoint and must be
    /// recorded against that endpoint's health and stats.
    #[must_use]
    pub fn is_endpoint_fault(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Connectivity | ErrorClass::Protocol | ErrorClass::Rpc | ErrorClass::RateLimit
        )
    }

    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}
