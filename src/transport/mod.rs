//! JSON-RPC transport: envelope parsing, upstream forwarding and the
//! HTTP server that ties the pipeline together.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────────────────────────┐     ┌─────────────┐
//! │   Caller    │────▶│              rpcgate                │────▶│  JSON-RPC   │
//! │             │◀────│   auth → parse → allowlist → relay  │◀────│  upstream   │
//! └─────────────┘     └─────────────────────────────────────┘     └─────────────┘
//! ```

pub mod jsonrpc;
pub mod server;
pub mod upstream;

pub use jsonrpc::{Envelope, JsonRpcId, JsonRpcRequest, JsonRpcResponse, parse_envelope};
pub use server::{GatewayHandler, GatewayServer, GatewayState};
pub use upstream::{UpstreamClient, UpstreamForwarder, UpstreamReply};
