//! Configuration for the gateway.
//!
//! This module provides:
//! - TOML configuration parsing
//! - Environment variable substitution (`${VAR}`, `${VAR:-default}`)
//! - Validation into immutable [`Settings`]
//!
//! # Example
//!
//! ```ignore
//! use rpcgate::config::load_settings;
//!
//! let (settings, result) = load_settings(Path::new("config.toml"))?;
//! for warning in &result.warnings {
//!     tracing::warn!(%warning, "Configuration warning");
//! }
//! ```

mod duration_format;
mod error;
mod loader;
mod schema;

pub use duration_format::{parse_duration, parse_or_default};
pub use error::{ConfigError, ValidationResult, ValidationWarning};
pub use loader::{
    DEFAULT_CONFIG_PATH, load_config, load_settings, substitute_env_vars, validate,
};
pub use schema::{
    Config, Credentials, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_BODY_SIZE, DEFAULT_READ_TIMEOUT,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_UPSTREAM_TIMEOUT, ProxyAuth, Server, Settings, Upstream,
    UpstreamSettings, WRITE_TIMEOUT_MARGIN,
};
