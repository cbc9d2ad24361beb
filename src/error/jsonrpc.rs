//! JSON-RPC 2.0 error object.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 error object.
///
/// Embedded in the `error` member of a response envelope. Gateway errors
/// never carry a `data` member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code from the JSON-RPC 2.0 reserved range
    pub code: i32,

    /// Human-readable error message
    pub message: String,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
