use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::upstream::{errors::UpstreamError, transport::RpcTransport};

/// Longest error body kept in an [`UpstreamError::HttpError`].
const MAX_ERROR_BODY: usize = 256;

/// Configuration for HTTP client concurrency and connection behavior.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum number of concurrent HTTP requests allowed
    pub concurrent_limit: usize,
    /// How long a request may wait for a concurrency permit
    pub permit_timeout_ms: u64,
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self { concurrent_limit: 512, permit_timeout_ms: 500, connect_timeout_ms: 5000 }
    }
}

/// HTTP transport with semaphore-based concurrency control.
///
/// Connections are pooled and kept alive across requests. Each call to
/// [`RpcTransport::post`] performs a single attempt.
pub struct HttpClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: HttpClientConfig,
}

/// RAII guard ensuring semaphore permits are always released.
struct PermitGuard {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
}

impl PermitGuard {
    fn new(permit: OwnedSemaphorePermit, semaphore: Arc<Semaphore>) -> Self {
        Self { _permit: permit, semaphore }
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        tracing::trace!(
            available_permits = self.semaphore.available_permits(),
            "permit guard dropped"
        );
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, UpstreamError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Creates a new HTTP client with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: HttpClientConfig) -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(64)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("ember/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit.max(1))),
            config,
        })
    }

    /// Sanitizes network errors so endpoint URLs and API keys never leak into messages.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_redirect() {
            "unexpected redirect".to_string()
        } else {
            "network error".to_string()
        }
    }

    fn truncate_body(raw: String) -> String {
        if raw.len() <= MAX_ERROR_BODY {
            return raw;
        }
        let mut cut = MAX_ERROR_BODY;
        while !raw.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... (truncated)", &raw[..cut])
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }

    async fn acquire_permit(&self) -> Result<PermitGuard, UpstreamError> {
        let permit = tokio::time::timeout(
            Duration::from_millis(self.config.permit_timeout_ms),
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                available_permits = self.concurrent_limit.available_permits(),
                "http client semaphore acquisition timeout"
            );
            UpstreamError::Timeout
        })?
        .map_err(|_| UpstreamError::ConnectionFailed("http client closed".to_string()))?;

        Ok(PermitGuard::new(permit, Arc::clone(&self.concurrent_limit)))
    }
}

#[async_trait]
impl RpcTransport for HttpClient {
    async fn post(&self, url: &str, body: Bytes, timeout: Duration) -> Result<Bytes, UpstreamError> {
        let _guard = self.acquire_permit().await?;

        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::debug!("upstream returned 429");
            return Err(UpstreamError::RateLimited);
        }
        if !status.is_success() {
            let raw_text = response.text().await.unwrap_or_default();
            tracing::trace!(status = status.as_u16(), "http request failed");
            return Err(UpstreamError::HttpError(status.as_u16(), Self::truncate_body(raw_text)));
        }

        response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))
            }
        })
    }
}
