//! Error handling for rpcgate.
//!
//! This module defines every failure the request pipeline can produce and
//! turns them into responses.
//!
//! ## Module Organization
//!
//! - `jsonrpc` - JSON-RPC 2.0 error object
//! - `GatewayError` - pipeline failures and their JSON-RPC code mapping
//! - `Rejection` - the error responder: one envelope (or a 401) per failure
//!
//! ## Surfacing
//!
//! | Failure | Transport status | Body |
//! |---------|------------------|------|
//! | Malformed body | 200 | `-32700` envelope, `id: null` |
//! | Disallowed method | 200 | `-32601` envelope, offending request's `id` |
//! | Upstream unreachable / timed out | 200 | `-32603` envelope |
//! | Inbound authentication | 401 + `WWW-Authenticate` | empty |

pub mod jsonrpc;

use std::time::Duration;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use jsonrpc::JsonRpcError;
use thiserror::Error;
use tracing::error;

use crate::transport::jsonrpc::{JsonRpcId, JsonRpcResponse};

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;
/// The method is not on the allowlist.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Internal or upstream transport failure.
pub const INTERNAL_ERROR: i32 = -32603;

/// Challenge sent with every 401.
pub const BASIC_CHALLENGE: &str = r#"Basic realm="rpcgate""#;

/// All failures that can occur while handling one inbound call.
///
/// Each variant except `Unauthorized` maps to a JSON-RPC error code; the
/// `Display` output is the exact message placed in the error envelope.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    /// The body could not be read or decoded as a request or batch.
    #[error("Parse error: {details}")]
    ParseError {
        /// Client-facing description ("invalid JSON", ...)
        details: String,
    },

    /// A request in the envelope names a method outside the allowlist.
    #[error("Method not allowed: {method}")]
    MethodNotAllowed {
        /// The rejected method name
        method: String,
    },

    /// Inbound Basic credentials were absent, malformed or wrong.
    #[error("Unauthorized")]
    Unauthorized,

    /// The upstream could not be reached.
    #[error("Internal error: upstream connection failed")]
    UpstreamConnectionFailed {
        /// The upstream URL that failed
        url: String,
        /// Reason for the failure (logged, never sent to the caller)
        reason: String,
    },

    /// The upstream did not answer within the configured timeout.
    #[error("Internal error: upstream request timed out")]
    UpstreamTimeout {
        /// The upstream URL that timed out
        url: String,
        /// The configured timeout
        timeout: Duration,
    },

    /// The upstream exchange failed after the connection was established.
    #[error("Internal error: upstream connection failed")]
    UpstreamRequestFailed {
        /// Reason for the failure (logged, never sent to the caller)
        reason: String,
    },

    /// The outbound request could not be assembled.
    #[error("Internal error: failed to create upstream request")]
    RequestBuild {
        /// Reason for the failure
        reason: String,
    },

    /// The inbound connection went away before the upstream answered.
    #[error("Internal error: request cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Shorthand for the decode failure every malformed body produces.
    pub fn invalid_json() -> Self {
        Self::ParseError {
            details: "invalid JSON".to_string(),
        }
    }

    /// The inbound body could not be read in full (too large, too slow,
    /// or the connection failed mid-body).
    pub fn unreadable_body() -> Self {
        Self::ParseError {
            details: "failed to read request body".to_string(),
        }
    }

    /// Maps the error to a JSON-RPC 2.0 error code.
    ///
    /// `Unauthorized` is answered at the HTTP layer and never rendered as an
    /// envelope; it maps to the internal error code for completeness.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            Self::ParseError { .. } => PARSE_ERROR,
            Self::MethodNotAllowed { .. } => METHOD_NOT_FOUND,
            Self::Unauthorized
            | Self::UpstreamConnectionFailed { .. }
            | Self::UpstreamTimeout { .. }
            | Self::UpstreamRequestFailed { .. }
            | Self::RequestBuild { .. }
            | Self::Cancelled => INTERNAL_ERROR,
        }
    }

    /// Returns the error type name for logging.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "parse_error",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::Unauthorized => "unauthorized",
            Self::UpstreamConnectionFailed { .. } => "upstream_connection_failed",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamRequestFailed { .. } => "upstream_request_failed",
            Self::RequestBuild { .. } => "request_build",
            Self::Cancelled => "cancelled",
        }
    }

    /// Converts the error to the JSON-RPC error object.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError::new(self.to_jsonrpc_code(), self.to_string())
    }
}

/// A pipeline failure bound to the identifier of the request that caused it.
///
/// This is the only way the gateway produces its own responses. `id` is
/// `None` when no identifier is known (parse failures, transport failures
/// on a batch) and serializes as `"id": null`.
#[derive(Debug)]
pub struct Rejection {
    pub id: Option<JsonRpcId>,
    pub error: GatewayError,
}

impl Rejection {
    pub fn new(id: Option<JsonRpcId>, error: GatewayError) -> Self {
        Self { id, error }
    }

    /// A rejection for which no request identifier is known.
    pub fn anonymous(error: GatewayError) -> Self {
        Self { id: None, error }
    }
}

impl From<GatewayError> for Rejection {
    fn from(error: GatewayError) -> Self {
        Self::anonymous(error)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        if self.error == GatewayError::Unauthorized {
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, BASIC_CHALLENGE)],
            )
                .into_response();
        }

        let envelope = JsonRpcResponse::error(self.id, self.error.to_jsonrpc_error());
        match serde_json::to_vec(&envelope) {
            Ok(bytes) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                bytes,
            )
                .into_response(),
            Err(e) => {
                error!(error = %e, "Failed to serialize error envelope");
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#,
                )
                    .into_response()
            }
        }
    }
}
