//! rpcgate - an allowlisting gateway for JSON-RPC endpoints.
//!
//! The gateway sits in front of a JSON-RPC node and only lets through
//! calls whose method is on a configured allowlist. Everything else about
//! a permitted call is left alone: the raw body goes upstream unmodified
//! and the upstream's status, headers and body come back verbatim.
//!
//! Optional Basic credentials can be required from callers and injected
//! toward the upstream, independently of each other.

pub mod auth;
pub mod config;
pub mod error;
pub mod guard;
pub mod logging_layer;
pub mod relay_body;
pub mod transport;
