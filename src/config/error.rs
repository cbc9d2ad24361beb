//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
///
/// Every variant is fatal: the process logs it and exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Required fields
    // ─────────────────────────────────────────────────────────────────────────
    /// `listen` is missing or empty.
    #[error("listen address is required")]
    MissingListenAddress,

    /// `upstream.url` is missing or empty.
    #[error("upstream URL is required")]
    MissingUpstreamUrl,

    /// `allowed_methods` is missing or empty.
    #[error("at least one allowed method is required")]
    NoAllowedMethods,

    /// `proxy_auth.enabled` without both credentials.
    #[error("proxy_auth username and password are required when enabled")]
    MissingProxyCredentials,

    // ─────────────────────────────────────────────────────────────────────────
    // Value validation
    // ─────────────────────────────────────────────────────────────────────────
    /// `listen` is neither `host:port` nor `:port`.
    #[error("invalid listen address '{listen}': {message}")]
    InvalidListenAddress { listen: String, message: String },

    /// `upstream.url` is not an absolute http(s) URL.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// `server.max_body_size` is zero.
    #[error("server.max_body_size must be greater than zero")]
    InvalidMaxBodySize,

    /// Required environment variable not set.
    #[error("environment variable '{var}' not set (referenced as '{reference}')")]
    MissingEnvVar { var: String, reference: String },

    // ─────────────────────────────────────────────────────────────────────────
    // I/O and parsing errors
    // ─────────────────────────────────────────────────────────────────────────
    /// TOML parsing error.
    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// I/O error reading config file.
    #[error("failed to read config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Empty configuration file.
    #[error("configuration file is empty")]
    EmptyConfigFile,
}

/// Validation warnings (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A duration could not be parsed (or was zero) and the default is used.
    InvalidDuration {
        field: String,
        value: String,
        fallback_secs: u64,
    },

    /// An allowlist entry is empty or has surrounding whitespace.
    SuspiciousMethodName { method: String },

    /// The same method is listed more than once.
    DuplicateMethod { method: String },

    /// Upstream credentials would travel unencrypted.
    CredentialsOverPlainHttp { url: String },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDuration {
                field,
                value,
                fallback_secs,
            } => {
                write!(
                    f,
                    "{field} '{value}' is not a usable duration, using {fallback_secs}s"
                )
            }
            Self::SuspiciousMethodName { method } => {
                write!(
                    f,
                    "allowed method '{method}' is empty or has surrounding whitespace and will only match exactly"
                )
            }
            Self::DuplicateMethod { method } => {
                write!(f, "allowed method '{method}' is listed more than once")
            }
            Self::CredentialsOverPlainHttp { url } => {
                write!(f, "upstream credentials will be sent unencrypted to {url}")
            }
        }
    }
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings encountered during validation.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Create a new validation result with no warnings.
    pub fn ok() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Create a validation result with warnings.
    pub fn with_warnings(warnings: Vec<ValidationWarning>) -> Self {
        Self { warnings }
    }

    /// True if there are no warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
