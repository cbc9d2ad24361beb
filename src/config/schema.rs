//! Configuration file layout and the validated settings built from it.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::guard::MethodAllowlist;

/// Default upstream timeout when unset or unusable.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on reading one inbound request body.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Extra time granted on top of the upstream timeout to finish writing.
pub const WRITE_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);
/// Idle keep-alive connections are closed after this long.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
/// Default drain deadline on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
/// Default inbound body limit (10 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// File layout
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration file as written on disk.
///
/// Every member defaults so that missing required fields are reported by
/// validation with a precise message instead of a generic TOML error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: String,
    #[serde(default)]
    pub proxy_auth: ProxyAuth,
    #[serde(default)]
    pub upstream: Upstream,
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub server: Server,
}

/// `[proxy_auth]`: credentials callers must present.
#[derive(Clone, Default, Deserialize)]
pub struct ProxyAuth {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// `[upstream]`: where allowed calls go.
#[derive(Clone, Default, Deserialize)]
pub struct Upstream {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Humantime duration, e.g. `30s`
    #[serde(default)]
    pub timeout: Option<String>,
}

/// `[server]`: listener tuning.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub max_body_size: Option<usize>,
    #[serde(default)]
    pub shutdown_timeout: Option<String>,
}

impl fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("enabled", &self.enabled)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validated settings
// ─────────────────────────────────────────────────────────────────────────────

/// A username/password pair for Basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Upstream endpoint settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Absolute http(s) URL the raw body is POSTed to
    pub url: reqwest::Url,
    /// Injected on every outbound call when present
    pub credentials: Option<Credentials>,
    /// Bound on the whole upstream exchange, body included
    pub timeout: Duration,
}

/// Immutable settings shared by every connection.
///
/// Built once by [`crate::config::validate`] and handed around as
/// `Arc<Settings>`; nothing mutates it after startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Socket address to bind, e.g. `0.0.0.0:8545`
    pub listen: String,
    /// Credentials callers must present (`None` = inbound auth disabled)
    pub inbound_auth: Option<Credentials>,
    pub upstream: UpstreamSettings,
    pub allowed_methods: MethodAllowlist,
    /// Largest inbound body accepted, in bytes
    pub max_body_size: usize,
    pub read_timeout: Duration,
    pub idle_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Settings {
    /// Settings with defaults for everything but the three required values.
    ///
    /// Mostly useful for embedding and tests; file-based configuration goes
    /// through [`crate::config::load_settings`].
    pub fn new(listen: impl Into<String>, upstream_url: reqwest::Url, allowed_methods: MethodAllowlist) -> Self {
        Self {
            listen: listen.into(),
            inbound_auth: None,
            upstream: UpstreamSettings {
                url: upstream_url,
                credentials: None,
                timeout: DEFAULT_UPSTREAM_TIMEOUT,
            },
            allowed_methods,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Deadline for writing a response: the upstream timeout plus a margin.
    pub fn write_timeout(&self) -> Duration {
        self.upstream.timeout + WRITE_TIMEOUT_MARGIN
    }

    pub fn inbound_auth_enabled(&self) -> bool {
        self.inbound_auth.is_some()
    }
}
