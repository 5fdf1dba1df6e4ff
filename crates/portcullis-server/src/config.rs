//! Server configuration.
//!
//! Configuration is a TOML file resolved from the `--config` CLI flag, the
//! `PORTCULLIS_CONFIG` environment variable, or the default path, in that
//! order. It is loaded once before serving begins and never reloaded.
//!
//! The client secret can be kept out of the file by setting
//! `PORTCULLIS_CLIENT_SECRET`, which overrides whatever the file says.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use portcullis_auth::ProviderConfig;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "portcullis.toml";

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "PORTCULLIS_CONFIG";

/// Environment variable overriding the provider client secret.
pub const CLIENT_SECRET_ENV: &str = "PORTCULLIS_CLIENT_SECRET";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// The path that failed to read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        /// The path that failed to parse.
        path: String,
        /// The underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerSection,

    /// The OIDC provider this relying party authenticates against.
    pub provider: ProviderConfig,

    /// Settings for the scope-gated resource.
    #[serde(default)]
    pub resource: ResourceSection,

    /// Session lifetimes.
    #[serde(default)]
    pub session: SessionSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Bind address (default: 127.0.0.1).
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port (default: 4000).
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Settings for the bearer-protected resource endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSection {
    /// Scope a token must carry to access `/profile`.
    #[serde(default = "default_required_scope")]
    pub required_scope: String,
}

fn default_required_scope() -> String {
    "vegbank:contributor".to_string()
}

impl Default for ResourceSection {
    fn default() -> Self {
        Self {
            required_scope: default_required_scope(),
        }
    }
}

/// Session lifetime settings, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// How long a browser session lives (default: 8 hours).
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// How long a login attempt stays valid (default: 10 minutes).
    #[serde(default = "default_login_ttl")]
    pub login_ttl_secs: u64,
}

fn default_session_ttl() -> u64 {
    8 * 3600
}

fn default_login_ttl() -> u64 {
    600
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            login_ttl_secs: default_login_ttl(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default log level when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
pub enum ConfigSource {
    /// From the `--config` CLI argument.
    CliArgument,
    /// From the `PORTCULLIS_CONFIG` environment variable.
    EnvironmentVariable,
    /// The default path.
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable ({CONFIG_PATH_ENV})"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Resolves the configuration file path.
///
/// Priority order: `--config <path>` on the command line, then
/// `PORTCULLIS_CONFIG`, then [`DEFAULT_CONFIG_PATH`].
#[must_use]
pub fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}

/// Loads configuration from a TOML file and applies environment overrides.
///
/// # Errors
///
/// Returns a `ConfigError` when the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut config: AppConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source: Box::new(source),
    })?;

    if let Ok(secret) = env::var(CLIENT_SECRET_ENV)
        && !secret.is_empty()
    {
        config.provider.client_secret = secret;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [provider]
        issuer = "https://auth.example.com/realms/main"
        client_id = "portcullis-web"
        client_secret = "s3cr3t"
        redirect_uri = "https://app.example.com/authorize"
    "#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.resource.required_scope, "vegbank:contributor");
        assert_eq!(config.session.ttl_secs, 8 * 3600);
        assert_eq!(config.session.login_ttl_secs, 600);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.provider.scopes, vec!["openid"]);
    }

    #[test]
    fn test_full_config() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [provider]
            issuer = "https://auth.example.com/realms/main"
            client_id = "portcullis-web"
            client_secret = "s3cr3t"
            redirect_uri = "https://app.example.com/authorize"
            scopes = ["openid", "profile", "vegbank:contributor"]
            token_endpoint = "https://auth.example.com/override/token"

            [resource]
            required_scope = "vegbank:editor"

            [session]
            ttl_secs = 3600
            login_ttl_secs = 300

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.provider.scopes.len(), 3);
        assert_eq!(
            config.provider.token_endpoint.as_deref(),
            Some("https://auth.example.com/override/token")
        );
        assert_eq!(config.resource.required_scope, "vegbank:editor");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_provider_section_fails() {
        let err = toml::from_str::<AppConfig>("[server]\nport = 1").unwrap_err();
        assert!(err.to_string().contains("provider"));
    }
}
