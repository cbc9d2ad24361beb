//! Upstream JSON-RPC client with connection pooling.
//!
//! This client maintains persistent connections to the upstream node and
//! forwards the caller's body byte-for-byte. It never re-serializes a
//! request: what the caller sent is what the upstream receives.
//!
//! # Connection Pooling
//!
//! The client uses reqwest's built-in connection pooling. A single client
//! is built at startup and shared by every connection task.
//!
//! # Error Classification
//!
//! Errors are classified into GatewayError variants:
//! - Timeout errors → UpstreamTimeout
//! - Connection errors → UpstreamConnectionFailed
//! - Request construction errors → RequestBuild
//! - Other errors → UpstreamRequestFailed
//!
//! All of them surface to the caller as `-32603`.
//!
//! # Security
//!
//! - TLS certificate verification is enabled by default
//! - No automatic retry (prevents duplicate side effects)

use std::time::Duration;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use http::StatusCode;
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::auth::basic_authorization;
use crate::config::UpstreamSettings;
use crate::error::GatewayError;

/// Boxed error type carried by relayed bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Streaming body of an upstream response.
pub type UpstreamBody = UnsyncBoxBody<Bytes, BoxError>;

/// Connection establishment bound, independent of the overall timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_MAX_IDLE_PER_HOST: usize = 32;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// What the upstream answered, ready to be relayed.
///
/// Status and headers are as received (hop-by-hop headers excepted); the
/// body has not been read yet.
pub struct UpstreamReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

impl std::fmt::Debug for UpstreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamReply")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Upstream JSON-RPC client.
///
/// # Thread Safety
///
/// The client is `Clone` and can be shared across tasks. The underlying
/// reqwest client handles connection pooling internally.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    url: Url,
    /// Precomputed `Authorization` value, when upstream credentials are set
    authorization: Option<HeaderValue>,
    timeout: Duration,
}

impl UpstreamClient {
    /// Create a new upstream client.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::RequestBuild` if the client cannot be built or
    /// the credentials cannot be encoded as a header value.
    pub fn new(settings: &UpstreamSettings) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(settings.timeout))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GatewayError::RequestBuild {
                reason: format!("upstream client build error: {}", e),
            })?;

        let authorization = settings
            .credentials
            .as_ref()
            .map(basic_authorization)
            .transpose()
            .map_err(|e| GatewayError::RequestBuild {
                reason: format!("invalid upstream credentials: {}", e),
            })?;

        Ok(Self {
            client,
            url: settings.url.clone(),
            authorization,
            timeout: settings.timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Forward a raw JSON-RPC body to the upstream.
    ///
    /// The call is raced against `cancel`; if the inbound connection goes
    /// away first, the in-flight request is dropped and
    /// `GatewayError::Cancelled` is returned.
    ///
    /// # Returns
    ///
    /// * `Ok(UpstreamReply)` - Any HTTP answer, whatever its status
    /// * `Err(GatewayError::UpstreamTimeout)` - Request timed out
    /// * `Err(GatewayError::UpstreamConnectionFailed)` - Failed to connect
    /// * `Err(GatewayError::Cancelled)` - Inbound side went away
    pub async fn forward(
        &self,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<UpstreamReply, GatewayError> {
        debug!(
            url = %self.url,
            body_len = body.len(),
            authenticated = self.authorization.is_some(),
            "Forwarding request to upstream"
        );

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json");
        if let Some(authorization) = &self.authorization {
            request = request.header(AUTHORIZATION, authorization.clone());
        }
        let request = request.body(body);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(url = %self.url, "Inbound connection closed, abandoning upstream call");
                return Err(GatewayError::Cancelled);
            }
            result = request.send() => result.map_err(|e| self.classify_error(e))?,
        };

        let status = response.status();
        let headers = relay_headers(response.headers());

        debug!(status = %status, "Received upstream response");

        let stream = response
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(|e| -> BoxError { Box::new(e) });
        let body = StreamBody::new(stream).boxed_unsync();

        Ok(UpstreamReply {
            status,
            headers,
            body,
        })
    }

    /// Classify a reqwest error into GatewayError.
    fn classify_error(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            warn!(
                url = %self.url,
                timeout_secs = self.timeout.as_secs_f64(),
                "Upstream request timed out"
            );
            GatewayError::UpstreamTimeout {
                url: self.url.to_string(),
                timeout: self.timeout,
            }
        } else if error.is_connect() {
            warn!(url = %self.url, error = %error, "Failed to connect to upstream");
            GatewayError::UpstreamConnectionFailed {
                url: self.url.to_string(),
                reason: error.to_string(),
            }
        } else if error.is_builder() {
            error!(error = %error, "Failed to create upstream request");
            GatewayError::RequestBuild {
                reason: error.to_string(),
            }
        } else {
            error!(url = %self.url, error = %error, "Upstream request failed");
            GatewayError::UpstreamRequestFailed {
                reason: error.to_string(),
            }
        }
    }
}

/// Copy upstream response headers, skipping hop-by-hop headers that
/// describe the upstream connection rather than the response.
fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !is_hop_by_hop_header(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Check if a header is a hop-by-hop header that shouldn't be relayed.
///
/// `HeaderName::as_str` is always lowercase.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Trait for upstream client (enables mocking in tests).
///
/// This trait abstracts the upstream forwarding behavior, allowing tests
/// to inject mock implementations without making actual HTTP requests.
#[async_trait::async_trait]
pub trait UpstreamForwarder: Send + Sync {
    /// Forward a raw body to the upstream.
    async fn forward(
        &self,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<UpstreamReply, GatewayError>;
}

#[async_trait::async_trait]
impl UpstreamForwarder for UpstreamClient {
    async fn forward(
        &self,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<UpstreamReply, GatewayError> {
        UpstreamClient::forward(self, body, cancel).await
    }
}
