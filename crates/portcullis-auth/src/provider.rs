//! Identity provider configuration.
//!
//! [`ProviderConfig`] is the immutable description of the OIDC provider this
//! relying party talks to: issuer, client credentials, redirect URI, requested
//! scopes, and optional explicit endpoint overrides. It is loaded once at
//! startup and never mutated afterwards.
//!
//! Endpoints that are not overridden here are resolved from the provider's
//! discovery document (see [`crate::discovery`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::discovery::DiscoveryDocument;
use crate::error::{AuthError, AuthResult};

/// Configuration for the OIDC provider this relying party authenticates against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// The OIDC issuer URL (e.g. `https://auth.example.com/realms/main`).
    pub issuer: Url,

    /// OAuth client id registered with the provider.
    pub client_id: String,

    /// OAuth client secret. Only ever sent over the server-to-server
    /// channel to the token endpoint, never to the user agent.
    pub client_secret: String,

    /// The redirect URI registered for this client (the callback endpoint).
    pub redirect_uri: Url,

    /// OAuth scopes to request at login (default: `["openid"]`).
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Optional override for the authorization endpoint.
    /// If not set, resolved from the discovery document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Optional override for the token endpoint.
    /// If not set, resolved from the discovery document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Optional override for the JWKS endpoint.
    /// If not set, resolved from the discovery document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// Optional override for the end-session endpoint.
    /// If not set, resolved from the discovery document (which may also
    /// omit it; logout is then local-only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// Whether to allow plain-HTTP provider endpoints.
    /// This should only be enabled for testing.
    #[serde(default)]
    pub allow_http: bool,

    /// Timeout for token-endpoint calls (default: 30 seconds).
    #[serde(default = "default_exchange_timeout", with = "duration_secs")]
    pub exchange_timeout: Duration,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string()]
}

fn default_exchange_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Serde helper serializing a `Duration` as whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl ProviderConfig {
    /// Creates a new provider configuration with required fields.
    #[must_use]
    pub fn new(
        issuer: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Url,
    ) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri,
            scopes: default_scopes(),
            authorization_endpoint: None,
            token_endpoint: None,
            jwks_uri: None,
            end_session_endpoint: None,
            allow_http: false,
            exchange_timeout: default_exchange_timeout(),
        }
    }

    /// Sets the scopes requested at login.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the authorization endpoint override.
    #[must_use]
    pub fn with_authorization_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.authorization_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the token endpoint override.
    #[must_use]
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the JWKS endpoint override.
    #[must_use]
    pub fn with_jwks_uri(mut self, uri: impl Into<String>) -> Self {
        self.jwks_uri = Some(uri.into());
        self
    }

    /// Sets the end-session endpoint override.
    #[must_use]
    pub fn with_end_session_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.end_session_endpoint = Some(endpoint.into());
        self
    }

    /// Allows plain-HTTP provider endpoints (testing only).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Sets the token-endpoint call timeout.
    #[must_use]
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Returns the scope request parameter (space-joined).
    #[must_use]
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    /// Returns the issuer as the exact string tokens must carry in `iss`.
    ///
    /// Trailing slashes are stripped so that `https://idp/` and
    /// `https://idp` compare equal, matching the discovery normalization.
    #[must_use]
    pub fn issuer_str(&self) -> &str {
        self.issuer.as_str().trim_end_matches('/')
    }

    /// Resolves the authorization endpoint, preferring the override.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the resolved value is not a valid URL.
    pub fn resolve_authorization_endpoint(&self, doc: &DiscoveryDocument) -> AuthResult<Url> {
        resolve_endpoint(
            self.authorization_endpoint.as_deref(),
            &doc.authorization_endpoint,
            "authorization_endpoint",
        )
    }

    /// Resolves the token endpoint, preferring the override.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the resolved value is not a valid URL.
    pub fn resolve_token_endpoint(&self, doc: &DiscoveryDocument) -> AuthResult<Url> {
        resolve_endpoint(
            self.token_endpoint.as_deref(),
            &doc.token_endpoint,
            "token_endpoint",
        )
    }

    /// Resolves the JWKS endpoint, preferring the override.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the resolved value is not a valid URL.
    pub fn resolve_jwks_uri(&self, doc: &DiscoveryDocument) -> AuthResult<Url> {
        resolve_endpoint(self.jwks_uri.as_deref(), &doc.jwks_uri, "jwks_uri")
    }

    /// Resolves the end-session endpoint, preferring the override.
    ///
    /// Returns `None` when neither the override nor the discovery document
    /// provides one; logout is then local-only.
    #[must_use]
    pub fn resolve_end_session_endpoint(&self, doc: &DiscoveryDocument) -> Option<Url> {
        self.end_session_endpoint
            .as_deref()
            .or(doc.end_session_endpoint.as_deref())
            .and_then(|e| Url::parse(e).ok())
    }
}

fn resolve_endpoint(override_value: Option<&str>, discovered: &str, name: &str) -> AuthResult<Url> {
    let raw = override_value.unwrap_or(discovered);
    Url::parse(raw)
        .map_err(|e| AuthError::configuration(format!("invalid {name} URL {raw:?}: {e}")))
}
