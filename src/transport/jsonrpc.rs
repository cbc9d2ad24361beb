//! JSON-RPC 2.0 types and parsing.
//!
//! # Fidelity
//!
//! The gateway inspects requests but never rewrites them. Identifiers and
//! parameter payloads are captured as raw JSON text (`RawValue`) so that
//! whatever the caller sent is what the upstream receives and what error
//! envelopes echo back: `1`, `1.0`, `"1"` and `null` all stay distinct.
//!
//! # Security Note
//!
//! This module parses untrusted input. The body size limit is enforced by
//! the server before any bytes reach `parse_envelope`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::error::jsonrpc::JsonRpcError;

// ============================================================================
// Fast Correlation ID Generator
// ============================================================================

/// Startup prefix derived from a single Uuid::new_v4() call.
/// The upper 64 bits provide process-level uniqueness.
static CORRELATION_PREFIX: LazyLock<u64> = LazyLock::new(|| {
    let seed = Uuid::new_v4().as_u128();
    (seed >> 64) as u64
});

/// Monotonically increasing counter for the lower 64 bits.
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a request correlation ID without hitting the CSPRNG per call.
///
/// Combines a process-unique prefix with a monotonically increasing
/// counter. The result has correct v4 version and RFC 4122 variant bits set.
pub fn fast_correlation_id() -> Uuid {
    let prefix = *CORRELATION_PREFIX;
    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut combined = ((prefix as u128) << 64) | (counter as u128);
    // Set version 4 (bits 48-51 of the 128-bit value)
    combined = (combined & !(0xF_u128 << 76)) | (0x4_u128 << 76);
    // Set variant 1 - RFC 4122 (bits 64-65)
    combined = (combined & !(0x3_u128 << 62)) | (0x2_u128 << 62);
    Uuid::from_u128(combined)
}

// ============================================================================
// Envelope Types
// ============================================================================

/// JSON-RPC 2.0 version constant.
const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request identifier, kept as the exact JSON text the caller sent.
///
/// Never coerce between types! If the client sends `"id": 1`, the error
/// envelope carries `"id": 1`, not `"id": "1"` and not `"id": 1.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonRpcId(Box<RawValue>);

impl JsonRpcId {
    /// Build an identifier from JSON text, e.g. `"42"` or `"\"abc\""`.
    pub fn from_raw(json: &str) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json.to_owned()).map(Self)
    }

    /// The identifier exactly as it appeared on the wire.
    pub fn as_raw(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for JsonRpcId {
    fn eq(&self, other: &Self) -> bool {
        self.as_raw() == other.as_raw()
    }
}

impl Eq for JsonRpcId {}

impl fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_raw())
    }
}

/// One JSON-RPC request as received from the caller.
///
/// Only `method` is interpreted. Missing members take their empty value:
/// a request without `method`, or with `"method": null`, carries `""`,
/// which no allowlist contains.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version tag, not validated
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Request ID (`None` when absent or `null`)
    #[serde(default)]
    pub id: Option<JsonRpcId>,
    /// Method name
    #[serde(default, deserialize_with = "null_as_empty")]
    pub method: String,
    /// Method parameters, opaque
    #[serde(default)]
    pub params: Option<Box<RawValue>>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parsed request body: exactly one request or an ordered batch.
///
/// The shape is decided once, from the first significant byte of the
/// body, and never revisited.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// Single request object
    Single(JsonRpcRequest),
    /// Array of request objects, in caller order
    Batch(Vec<JsonRpcRequest>),
}

impl Envelope {
    /// All requests in the envelope; a single request is a batch of one.
    pub fn requests(&self) -> &[JsonRpcRequest] {
        match self {
            Self::Single(request) => std::slice::from_ref(request),
            Self::Batch(requests) => requests,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    pub fn len(&self) -> usize {
        self.requests().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests().is_empty()
    }

    /// The identifier to use when a failure concerns the whole envelope.
    ///
    /// A single request names itself; a batch has no one identifier.
    pub fn envelope_id(&self) -> Option<JsonRpcId> {
        match self {
            Self::Single(request) => request.id.clone(),
            Self::Batch(_) => None,
        }
    }
}

/// JSON-RPC 2.0 response envelope.
///
/// `result` and `error` are mutually exclusive; the only constructors are
/// `success` and `error`, so a value can never carry both. The `id` member
/// always serializes, `None` becoming `"id": null`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: Cow<'static, str>,
    id: Option<JsonRpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response carrying an opaque result.
    pub fn success(id: Option<JsonRpcId>, result: Box<RawValue>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    ///
    /// Pass `None` as `id` if the request ID could not be determined
    /// (e.g., parse error); it serializes as `"id": null`.
    pub fn error(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn id(&self) -> Option<&JsonRpcId> {
        self.id.as_ref()
    }

    pub fn result(&self) -> Option<&RawValue> {
        self.result.as_deref()
    }

    pub fn error_object(&self) -> Option<&JsonRpcError> {
        self.error.as_ref()
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Decode a raw body into an [`Envelope`].
///
/// A body whose first significant byte is `[` is decoded as a batch, one
/// starting with `{` as a single request. Anything else, or a body that
/// fails to decode in the shape it announced, is a parse error.
///
/// An empty batch decodes to `Envelope::Batch(vec![])`; it is not treated
/// specially here.
pub fn parse_envelope(bytes: &[u8]) -> Result<Envelope, GatewayError> {
    // Peek at the first non-whitespace byte to determine single vs batch
    // without parsing the payload into an intermediate Value.
    let first_byte = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .ok_or_else(GatewayError::invalid_json)?;

    match first_byte {
        b'[' => serde_json::from_slice::<Vec<JsonRpcRequest>>(bytes)
            .map(Envelope::Batch)
            .map_err(decode_error),
        b'{' => serde_json::from_slice::<JsonRpcRequest>(bytes)
            .map(Envelope::Single)
            .map_err(decode_error),
        _ => Err(GatewayError::invalid_json()),
    }
}

fn decode_error(e: serde_json::Error) -> GatewayError {
    tracing::debug!(error = %e, "Request body failed to decode");
    GatewayError::invalid_json()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(body: &str) -> JsonRpcRequest {
        match parse_envelope(body.as_bytes()).expect("should parse") {
            Envelope::Single(request) => request,
            Envelope::Batch(_) => panic!("expected single request"),
        }
    }

    #[test]
    fn test_parse_valid_single_request() {
        let request = single(r#"{"jsonrpc":"2.0","id":1,"method":"eth_call","params":[]}"#);

        assert_eq!(request.jsonrpc.as_deref(), Some("2.0"));
        assert_eq!(request.method, "eth_call");
        assert_eq!(request.id.unwrap().as_raw(), "1");
        assert_eq!(request.params.unwrap().get(), "[]");
    }

    #[test]
    fn test_parse_batch_keeps_order() {
        let body = r#"[
            {"jsonrpc":"2.0","id":1,"method":"eth_call"},
            {"jsonrpc":"2.0","id":"two","method":"eth_blockNumber"},
            {"jsonrpc":"2.0","method":"eth_chainId"}
        ]"#;

        let envelope = parse_envelope(body.as_bytes()).expect("should parse");

        assert!(envelope.is_batch());
        let methods: Vec<_> = envelope.requests().iter().map(|r| r.method.as_str()).collect();
        assert_eq!(methods, ["eth_call", "eth_blockNumber", "eth_chainId"]);
        assert_eq!(envelope.requests()[1].id.as_ref().unwrap().as_raw(), r#""two""#);
        assert!(envelope.requests()[2].id.is_none());
    }

    #[test]
    fn test_parse_empty_batch_is_not_special_cased() {
        let envelope = parse_envelope(b"[]").expect("should parse");

        assert!(envelope.is_batch());
        assert!(envelope.is_empty());
    }

    #[test]
    fn test_parse_malformed_json_error() {
        let err = parse_envelope(b"not json").unwrap_err();

        assert_eq!(err, GatewayError::invalid_json());
        assert_eq!(err.to_jsonrpc_code(), -32700);
    }

    #[test]
    fn test_parse_empty_body_error() {
        assert_eq!(parse_envelope(b"").unwrap_err(), GatewayError::invalid_json());
        assert_eq!(parse_envelope(b" \n\t").unwrap_err(), GatewayError::invalid_json());
    }

    #[test]
    fn test_parse_scalar_body_error() {
        for body in ["42", "\"eth_call\"", "null", "true"] {
            assert_eq!(
                parse_envelope(body.as_bytes()).unwrap_err(),
                GatewayError::invalid_json(),
                "body {body}"
            );
        }
    }

    #[test]
    fn test_parse_batch_of_non_objects_error() {
        assert_eq!(parse_envelope(b"[1, 2]").unwrap_err(), GatewayError::invalid_json());
    }

    #[test]
    fn test_parse_truncated_and_trailing_garbage() {
        assert!(parse_envelope(br#"{"id":1,"method":"eth_call""#).is_err());
        assert!(parse_envelope(br#"{"id":1,"method":"eth_call"} x"#).is_err());
        assert!(parse_envelope(br#"[{"id":1,"method":"eth_call"}"#).is_err());
    }

    #[test]
    fn test_parse_wrong_member_type_error() {
        assert!(parse_envelope(br#"{"id":1,"method":7}"#).is_err());
    }

    #[test]
    fn test_leading_whitespace_allowed() {
        let request = single("  \r\n {\"id\":3,\"method\":\"eth_call\"}");
        assert_eq!(request.method, "eth_call");
    }

    #[test]
    fn test_missing_method_is_empty() {
        let request = single(r#"{"jsonrpc":"2.0","id":9}"#);
        assert_eq!(request.method, "");
    }

    #[test]
    fn test_null_method_is_empty() {
        let request = single(r#"{"jsonrpc":"2.0","id":"n","method":null}"#);
        assert_eq!(request.method, "");
        assert_eq!(request.id.unwrap().as_raw(), r#""n""#);

        let envelope = parse_envelope(br#"[{"id":1,"method":"eth_call"},{"id":2,"method":null}]"#)
            .expect("should parse");
        assert_eq!(envelope.requests()[1].method, "");
    }

    #[test]
    fn test_unknown_members_ignored() {
        let request = single(r#"{"id":1,"method":"eth_call","extra":{"a":1}}"#);
        assert_eq!(request.method, "eth_call");
    }

    #[test]
    fn test_preserve_integer_id() {
        let request = single(r#"{"id":42,"method":"eth_call"}"#);
        assert_eq!(request.id.unwrap().as_raw(), "42");
    }

    #[test]
    fn test_preserve_string_id() {
        let request = single(r#"{"id":"42","method":"eth_call"}"#);
        assert_eq!(request.id.unwrap().as_raw(), r#""42""#);
    }

    #[test]
    fn test_preserve_float_id_text() {
        let request = single(r#"{"id":1.50,"method":"eth_call"}"#);
        assert_eq!(request.id.unwrap().as_raw(), "1.50");
    }

    #[test]
    fn test_null_and_missing_id() {
        assert!(single(r#"{"id":null,"method":"eth_call"}"#).id.is_none());
        assert!(single(r#"{"method":"eth_call"}"#).id.is_none());
    }

    #[test]
    fn test_params_kept_verbatim() {
        let request = single(r#"{"id":1,"method":"eth_call","params":[{"to":"0xab","data":"0x"}, 1.000e3]}"#);
        assert_eq!(
            request.params.unwrap().get(),
            r#"[{"to":"0xab","data":"0x"}, 1.000e3]"#
        );
    }

    #[test]
    fn test_envelope_id() {
        let envelope = parse_envelope(br#"{"id":"x","method":"eth_call"}"#).unwrap();
        assert_eq!(envelope.envelope_id().unwrap().as_raw(), r#""x""#);

        let envelope = parse_envelope(br#"[{"id":"x","method":"eth_call"}]"#).unwrap();
        assert!(envelope.envelope_id().is_none());
    }

    #[test]
    fn test_jsonrpc_response_error_unknown_id_serializes_as_null() {
        let response = JsonRpcResponse::error(None, JsonRpcError::new(-32700, "Parse error: invalid JSON"));

        let json = serde_json::to_string(&response).unwrap();

        assert_eq!(
            json,
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error: invalid JSON"}}"#
        );
        assert!(response.result().is_none());
    }

    #[test]
    fn test_jsonrpc_response_success() {
        let id = JsonRpcId::from_raw("1").unwrap();
        let result = RawValue::from_string("\"0x1\"".to_string()).unwrap();

        let response = JsonRpcResponse::success(Some(id), result);
        let json = serde_json::to_string(&response).unwrap();

        assert_eq!(json, r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#);
        assert!(response.error_object().is_none());
    }

    #[test]
    fn test_id_equality_is_textual() {
        let a = JsonRpcId::from_raw("1").unwrap();
        let b = JsonRpcId::from_raw("1.0").unwrap();
        let c = JsonRpcId::from_raw("1").unwrap();

        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.to_string(), "1");
    }

    #[test]
    fn test_correlation_ids_unique() {
        let a = fast_correlation_id();
        let b = fast_correlation_id();
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 4);
    }
}
