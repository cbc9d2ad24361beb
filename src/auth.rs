//! Basic-scheme authentication on both sides of the hop.
//!
//! Inbound: callers present `Authorization: Basic <base64(user:pass)>` when
//! inbound authentication is enabled. Outbound: configured upstream
//! credentials are attached to every forwarded call, whatever the caller
//! presented.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderValue, InvalidHeaderValue};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::Credentials;
use crate::error::GatewayError;

const BASIC_PREFIX: &str = "Basic ";

/// Inbound credential check.
///
/// Absent header, other scheme, bad base64, missing `:` and wrong
/// credentials are indistinguishable to the caller: all produce
/// [`GatewayError::Unauthorized`].
#[derive(Debug, Clone)]
pub struct InboundAuth {
    expected: Credentials,
}

impl InboundAuth {
    pub fn new(expected: Credentials) -> Self {
        Self { expected }
    }

    pub fn verify(&self, headers: &HeaderMap) -> Result<(), GatewayError> {
        let Some((username, password)) = basic_credentials(headers) else {
            debug!("Missing or malformed Basic credentials");
            return Err(GatewayError::Unauthorized);
        };

        // Both halves are always compared so a wrong username costs the same
        let username_ok = username.as_bytes().ct_eq(self.expected.username.as_bytes());
        let password_ok = password.as_bytes().ct_eq(self.expected.password.as_bytes());

        if bool::from(username_ok & password_ok) {
            Ok(())
        } else {
            debug!("Credential mismatch");
            Err(GatewayError::Unauthorized)
        }
    }
}

/// Extract the decoded `user:pass` pair from an `Authorization` header.
///
/// The password may itself contain `:`; only the first one separates.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix(BASIC_PREFIX)?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Build the outbound `Authorization` header for `credentials`.
///
/// The value is marked sensitive so it never shows up in header dumps.
pub fn basic_authorization(credentials: &Credentials) -> Result<HeaderValue, InvalidHeaderValue> {
    let token = STANDARD.encode(format!(
        "{}:{}",
        credentials.username, credentials.password
    ));
    let mut value = HeaderValue::from_str(&format!("{BASIC_PREFIX}{token}"))?;
    value.set_sensitive(true);
    Ok(value)
}
