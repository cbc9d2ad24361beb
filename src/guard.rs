//! Method allowlist enforcement.
//!
//! Every request in an envelope must name an allowed method. The upstream
//! exchange carries the whole body at once, so one disallowed method
//! rejects the entire envelope and nothing is forwarded.

use std::collections::HashSet;

use tracing::warn;

use crate::error::{GatewayError, Rejection};
use crate::transport::jsonrpc::Envelope;

/// Set of method names allowed through to the upstream.
///
/// Matching is exact and case-sensitive: `eth_call` does not admit
/// `ETH_CALL` or `eth_call `.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodAllowlist {
    methods: HashSet<String>,
}

impl MethodAllowlist {
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }

    #[inline]
    pub fn is_allowed(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Allowed methods in lexical order, for startup logging.
    pub fn sorted(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.methods.iter().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Check every request in `envelope` against the allowlist.
    ///
    /// Requests are checked in caller order. The first disallowed one
    /// produces a rejection carrying that request's own identifier.
    pub fn check(&self, envelope: &Envelope) -> Result<(), Rejection> {
        let Some(offender) = envelope
            .requests()
            .iter()
            .find(|request| !self.is_allowed(&request.method))
        else {
            return Ok(());
        };

        warn!(
            method = %offender.method,
            id = offender.id.as_ref().map(|id| id.as_raw()),
            batch = envelope.is_batch(),
            batch_size = envelope.len(),
            "Blocked method"
        );

        Err(Rejection::new(
            offender.id.clone(),
            GatewayError::MethodNotAllowed {
                method: offender.method.clone(),
            },
        ))
    }
}
