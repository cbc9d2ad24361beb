//! Configuration loading and validation.
//!
//! Loading flow: read file → reject empty → substitute `${VAR}` references
//! → parse TOML → validate into [`Settings`].

use regex::Regex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::LazyLock;

use super::duration_format::parse_or_default;
use super::error::{ConfigError, ValidationResult, ValidationWarning};
use super::schema::{
    Config, Credentials, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_BODY_SIZE, DEFAULT_READ_TIMEOUT,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_UPSTREAM_TIMEOUT, Settings, UpstreamSettings,
};
use crate::guard::MethodAllowlist;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Load configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
        path: path.to_path_buf(),
        source,
    })?;

    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }

    let contents = substitute_env_vars(&contents)?;

    let config: Config = toml::from_str(&contents)?;

    Ok(config)
}

/// Load, validate and freeze configuration.
pub fn load_settings(path: &Path) -> Result<(Settings, ValidationResult), ConfigError> {
    let config = load_config(path)?;
    validate(&config)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment Variable Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// Regex for ${VAR} and ${VAR:-default} patterns
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid regex")
});

/// Substitute environment variables in a string.
///
/// # Syntax
/// - `${VAR}` - Required, fail if not set
/// - `${VAR:-default}` - Optional with default
///
/// Substituted text is inserted verbatim, so a value containing a quote
/// must be escaped for TOML by whoever sets it.
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing = None;

    let result = ENV_VAR_PATTERN.replace_all(content, |caps: &regex::Captures<'_>| {
        let var_name = &caps[1];
        match (std::env::var(var_name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| (var_name.to_string(), caps[0].to_string()));
                String::new()
            }
        }
    });

    if let Some((var, reference)) = missing {
        return Err(ConfigError::MissingEnvVar { var, reference });
    }

    Ok(result.into_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a parsed configuration and build the immutable [`Settings`].
pub fn validate(config: &Config) -> Result<(Settings, ValidationResult), ConfigError> {
    let mut warnings = Vec::new();

    let listen = normalize_listen(&config.listen)?;

    let upstream_url = config.upstream.url.trim();
    if upstream_url.is_empty() {
        return Err(ConfigError::MissingUpstreamUrl);
    }
    let url = reqwest::Url::parse(upstream_url).map_err(|e| ConfigError::InvalidUrl {
        url: upstream_url.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            url: upstream_url.to_string(),
            message: "scheme must be http or https".to_string(),
        });
    }

    if config.allowed_methods.is_empty() {
        return Err(ConfigError::NoAllowedMethods);
    }
    let mut seen = HashSet::new();
    for method in &config.allowed_methods {
        if method.is_empty() || method.trim() != method {
            warnings.push(ValidationWarning::SuspiciousMethodName {
                method: method.clone(),
            });
        }
        if !seen.insert(method.as_str()) {
            warnings.push(ValidationWarning::DuplicateMethod {
                method: method.clone(),
            });
        }
    }

    let inbound_auth = if config.proxy_auth.enabled {
        if config.proxy_auth.username.is_empty() || config.proxy_auth.password.is_empty() {
            return Err(ConfigError::MissingProxyCredentials);
        }
        Some(Credentials::new(
            &config.proxy_auth.username,
            &config.proxy_auth.password,
        ))
    } else {
        None
    };

    let credentials = (!config.upstream.username.is_empty()).then(|| {
        Credentials::new(&config.upstream.username, &config.upstream.password)
    });
    if credentials.is_some() && url.scheme() == "http" {
        warnings.push(ValidationWarning::CredentialsOverPlainHttp {
            url: upstream_url.to_string(),
        });
    }

    let (timeout, rejected) =
        parse_or_default(config.upstream.timeout.as_deref(), DEFAULT_UPSTREAM_TIMEOUT);
    if let Some(value) = rejected {
        warnings.push(ValidationWarning::InvalidDuration {
            field: "upstream.timeout".to_string(),
            value,
            fallback_secs: DEFAULT_UPSTREAM_TIMEOUT.as_secs(),
        });
    }

    let (shutdown_timeout, rejected) = parse_or_default(
        config.server.shutdown_timeout.as_deref(),
        DEFAULT_SHUTDOWN_TIMEOUT,
    );
    if let Some(value) = rejected {
        warnings.push(ValidationWarning::InvalidDuration {
            field: "server.shutdown_timeout".to_string(),
            value,
            fallback_secs: DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
        });
    }

    let max_body_size = match config.server.max_body_size {
        Some(0) => return Err(ConfigError::InvalidMaxBodySize),
        Some(size) => size,
        None => DEFAULT_MAX_BODY_SIZE,
    };

    let settings = Settings {
        listen,
        inbound_auth,
        upstream: UpstreamSettings {
            url,
            credentials,
            timeout,
        },
        allowed_methods: MethodAllowlist::new(config.allowed_methods.iter().cloned()),
        max_body_size,
        read_timeout: DEFAULT_READ_TIMEOUT,
        idle_timeout: DEFAULT_IDLE_TIMEOUT,
        shutdown_timeout,
    };

    Ok((settings, ValidationResult::with_warnings(warnings)))
}

/// `":8545"` binds every interface, as it does for Go-style listeners.
///
/// Anything else must be a socket address or `hostname:port`; hostnames
/// are resolved at bind time.
fn normalize_listen(listen: &str) -> Result<String, ConfigError> {
    let listen = listen.trim();
    if listen.is_empty() {
        return Err(ConfigError::MissingListenAddress);
    }

    let listen = if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    };

    if listen.parse::<SocketAddr>().is_ok() {
        return Ok(listen);
    }

    let message = match listen.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty() && !host.contains(':') && !host.contains(char::is_whitespace) =>
        {
            if port.parse::<u16>().is_ok() {
                return Ok(listen);
            }
            "port must be a number between 0 and 65535"
        }
        _ => "expected host:port or :port",
    };

    Err(ConfigError::InvalidListenAddress {
        listen,
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use std::time::Duration;

    const MINIMAL: &str = r#"
listen = "127.0.0.1:8545"
allowed_methods = ["eth_call"]

[upstream]
url = "http://127.0.0.1:8546"
"#;

    fn parse(toml: &str) -> Config {
        toml::from_str(toml).expect("valid toml")
    }

    #[test]
    fn test_validate_minimal() {
        let (settings, result) = validate(&parse(MINIMAL)).unwrap();

        assert!(result.is_clean());
        assert_eq!(settings.listen, "127.0.0.1:8545");
        assert_eq!(settings.upstream.url.as_str(), "http://127.0.0.1:8546/");
        assert_eq!(settings.upstream.timeout, Duration::from_secs(30));
        assert!(settings.upstream.credentials.is_none());
        assert!(settings.inbound_auth.is_none());
        assert!(settings.allowed_methods.is_allowed("eth_call"));
        assert_eq!(settings.max_body_size, DEFAULT_MAX_BODY_SIZE);
    }

    #[test]
    fn test_missing_listen() {
        let config = parse(
            r#"
allowed_methods = ["eth_call"]
[upstream]
url = "http://127.0.0.1:8546"
"#,
        );
        assert!(matches!(
            validate(&config),
            Err(ConfigError::MissingListenAddress)
        ));
    }

    #[test]
    fn test_missing_upstream_url() {
        let config = parse(
            r#"
listen = ":8545"
allowed_methods = ["eth_call"]
"#,
        );
        assert!(matches!(validate(&config), Err(ConfigError::MissingUpstreamUrl)));
    }

    #[test]
    fn test_invalid_upstream_url() {
        let mut config = parse(MINIMAL);
        config.upstream.url = "not a url".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl { .. })));

        config.upstream.url = "ftp://node/".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_empty_allowlist() {
        let mut config = parse(MINIMAL);
        config.allowed_methods.clear();
        assert!(matches!(validate(&config), Err(ConfigError::NoAllowedMethods)));
    }

    #[test]
    fn test_proxy_auth_requires_credentials() {
        let mut config = parse(MINIMAL);
        config.proxy_auth.enabled = true;
        config.proxy_auth.username = "user".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::MissingProxyCredentials)
        ));

        config.proxy_auth.password = "pass".to_string();
        let (settings, _) = validate(&config).unwrap();
        assert_eq!(
            settings.inbound_auth,
            Some(Credentials::new("user", "pass"))
        );
    }

    #[test]
    fn test_disabled_proxy_auth_ignores_credentials() {
        let mut config = parse(MINIMAL);
        config.proxy_auth.username = "user".to_string();
        let (settings, _) = validate(&config).unwrap();
        assert!(settings.inbound_auth.is_none());
    }

    #[test]
    fn test_listen_shorthand() {
        let mut config = parse(MINIMAL);
        config.listen = ":9000".to_string();
        let (settings, _) = validate(&config).unwrap();
        assert_eq!(settings.listen, "0.0.0.0:9000");
    }

    #[test]
    fn test_listen_forms_accepted() {
        for listen in ["127.0.0.1:8545", "[::1]:8545", "localhost:8545", " 0.0.0.0:80 "] {
            let mut config = parse(MINIMAL);
            config.listen = listen.to_string();
            let (settings, _) = validate(&config).unwrap();
            assert_eq!(settings.listen, listen.trim());
        }
    }

    #[test]
    fn test_invalid_listen_rejected() {
        for listen in ["8545", "localhost", ":http", "127.0.0.1:99999", "::1:8545", "my host:80"] {
            let mut config = parse(MINIMAL);
            config.listen = listen.to_string();
            assert!(
                matches!(validate(&config), Err(ConfigError::InvalidListenAddress { .. })),
                "{listen} should be rejected"
            );
        }
    }

    #[test]
    fn test_timeout_parsing_and_fallback() {
        let mut config = parse(MINIMAL);
        config.upstream.timeout = Some("5s".to_string());
        let (settings, result) = validate(&config).unwrap();
        assert_eq!(settings.upstream.timeout, Duration::from_secs(5));
        assert_eq!(settings.write_timeout(), Duration::from_secs(15));
        assert!(result.is_clean());

        config.upstream.timeout = Some("eventually".to_string());
        let (settings, result) = validate(&config).unwrap();
        assert_eq!(settings.upstream.timeout, Duration::from_secs(30));
        assert!(matches!(
            &result.warnings[0],
            ValidationWarning::InvalidDuration { field, .. } if field == "upstream.timeout"
        ));
    }

    #[test]
    fn test_upstream_credentials() {
        let mut config = parse(MINIMAL);
        config.upstream.username = "node".to_string();
        config.upstream.password = "secret".to_string();

        let (settings, result) = validate(&config).unwrap();

        assert_eq!(
            settings.upstream.credentials,
            Some(Credentials::new("node", "secret"))
        );
        assert!(result.warnings.contains(&ValidationWarning::CredentialsOverPlainHttp {
            url: "http://127.0.0.1:8546".to_string()
        }));
    }

    #[test]
    fn test_allowlist_warnings() {
        let mut config = parse(MINIMAL);
        config.allowed_methods = vec![
            "eth_call".to_string(),
            "eth_call".to_string(),
            " eth_chainId".to_string(),
        ];

        let (_, result) = validate(&config).unwrap();

        assert!(result.warnings.contains(&ValidationWarning::DuplicateMethod {
            method: "eth_call".to_string()
        }));
        assert!(result.warnings.contains(&ValidationWarning::SuspiciousMethodName {
            method: " eth_chainId".to_string()
        }));
    }

    #[test]
    fn test_zero_body_size_rejected() {
        let mut config = parse(MINIMAL);
        config.server.max_body_size = Some(0);
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidMaxBodySize)
        ));
    }

    #[test]
    fn test_load_settings_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let (settings, _) = load_settings(file.path()).unwrap();

        assert_eq!(settings.listen, "127.0.0.1:8545");
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config(Path::new("/nonexistent/rpcgate.toml"));
        assert!(matches!(result, Err(ConfigError::IoError { .. })));
    }

    #[test]
    fn test_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::EmptyConfigFile)
        ));
    }

    #[test]
    fn test_load_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"listen = [unterminated").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_env_var_substitution_required() {
        unsafe {
            std::env::set_var("RPCGATE_TEST_VAR", "test_value");
        }
        let input = "password = \"${RPCGATE_TEST_VAR}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "password = \"test_value\"");
        unsafe {
            std::env::remove_var("RPCGATE_TEST_VAR");
        }
    }

    #[test]
    #[serial]
    fn test_env_var_substitution_with_default() {
        unsafe {
            std::env::remove_var("RPCGATE_MISSING_VAR");
        }
        let input = "timeout = \"${RPCGATE_MISSING_VAR:-15s}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "timeout = \"15s\"");
    }

    #[test]
    #[serial]
    fn test_env_var_substitution_missing_required() {
        unsafe {
            std::env::remove_var("RPCGATE_REQUIRED_VAR");
        }
        let input = "url = \"${RPCGATE_REQUIRED_VAR}\"";
        let result = substitute_env_vars(input);
        assert!(matches!(
            result,
            Err(ConfigError::MissingEnvVar { var, .. }) if var == "RPCGATE_REQUIRED_VAR"
        ));
    }

    #[test]
    #[serial]
    fn test_load_with_env_secret() {
        unsafe {
            std::env::set_var("RPCGATE_UPSTREAM_PASSWORD", "from-env");
        }
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{MINIMAL}username = \"node\"\npassword = \"${{RPCGATE_UPSTREAM_PASSWORD}}\"\n"
        )
        .unwrap();

        let (settings, _) = load_settings(file.path()).unwrap();

        assert_eq!(
            settings.upstream.credentials,
            Some(Credentials::new("node", "from-env"))
        );
        unsafe {
            std::env::remove_var("RPCGATE_UPSTREAM_PASSWORD");
        }
    }
}
