//! OpenID Connect discovery fetching and caching.
//!
//! The provider's metadata is fetched once from
//! `{issuer}/.well-known/openid-configuration` and cached with a TTL. Only
//! the fields this relying party consumes are retained; everything else in
//! the document is ignored.
//!
//! # Security
//!
//! - The issuer claim in the fetched document must match the configured
//!   issuer exactly (OIDC Discovery 1.0 §4.3).
//! - Only HTTPS endpoints are accepted unless `allow_http` is configured
//!   for tests.
//! - Fetches carry a request timeout so a slow provider cannot hang callers.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::error::{AuthError, AuthResult};

/// The subset of the OIDC discovery document this relying party uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// URL the provider asserts as its issuer identifier.
    pub issuer: String,

    /// URL of the provider's authorization endpoint.
    pub authorization_endpoint: String,

    /// URL of the provider's token endpoint.
    pub token_endpoint: String,

    /// URL of the provider's JSON Web Key Set document.
    pub jwks_uri: String,

    /// URL of the provider's UserInfo endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// URL the relying party can call to end the provider-side session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
}

/// Configuration for the discovery cache.
#[derive(Debug, Clone)]
pub struct DiscoveryCacheConfig {
    /// Time-to-live for the cached document (default: 1 hour).
    pub ttl: Duration,

    /// HTTP request timeout (default: 10 seconds).
    pub request_timeout: Duration,

    /// Whether to allow plain-HTTP issuer URLs (testing only).
    pub allow_http: bool,
}

impl Default for DiscoveryCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(10),
            allow_http: false,
        }
    }
}

impl DiscoveryCacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Allows plain-HTTP issuer URLs (testing only).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

struct CachedDocument {
    document: DiscoveryDocument,
    expires_at: Instant,
}

/// TTL-bounded cache for one provider's discovery document.
///
/// The cache holds a single slot bound to the configured issuer; a refresh
/// replaces the slot atomically so readers never observe a partial update.
pub struct DiscoveryCache {
    issuer: Url,
    http_client: reqwest::Client,
    cache: RwLock<Option<CachedDocument>>,
    config: DiscoveryCacheConfig,
}

impl DiscoveryCache {
    /// Creates a new discovery cache for the given issuer.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(issuer: Url, config: DiscoveryCacheConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            issuer,
            http_client,
            cache: RwLock::new(None),
            config,
        }
    }

    /// Returns the cached document, fetching it when absent or expired.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryUnavailable` when the document cannot be fetched or
    /// parsed, and `Configuration` when the document's issuer does not match
    /// the configured issuer.
    pub async fn get(&self) -> AuthResult<DiscoveryDocument> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && Instant::now() < cached.expires_at
            {
                return Ok(cached.document.clone());
            }
        }

        self.refresh().await
    }

    /// Fetches the discovery document and replaces the cache slot.
    ///
    /// # Errors
    ///
    /// See [`DiscoveryCache::get`].
    pub async fn refresh(&self) -> AuthResult<DiscoveryDocument> {
        self.validate_scheme()?;

        let discovery_url = self.discovery_url();
        tracing::debug!(url = %discovery_url, "Fetching OIDC discovery document");

        let response = self
            .http_client
            .get(discovery_url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(issuer = %self.issuer, error = %e, "Discovery fetch failed");
                AuthError::discovery_unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(AuthError::discovery_unavailable(format!(
                "HTTP status {}",
                response.status().as_u16()
            )));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| AuthError::discovery_unavailable(format!("parse failure: {e}")))?;

        // OIDC Discovery 1.0 §4.3: the returned issuer must be identical to
        // the issuer the document was retrieved for.
        let expected = self.issuer.as_str().trim_end_matches('/');
        let actual = document.issuer.trim_end_matches('/');
        if expected != actual {
            return Err(AuthError::configuration(format!(
                "discovery issuer {actual:?} does not match configured issuer {expected:?}"
            )));
        }

        let mut cache = self.cache.write().await;
        *cache = Some(CachedDocument {
            document: document.clone(),
            expires_at: Instant::now() + self.config.ttl,
        });

        Ok(document)
    }

    /// Drops the cached document so the next `get` fetches a fresh copy.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    fn validate_scheme(&self) -> AuthResult<()> {
        match self.issuer.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_http => Ok(()),
            other => Err(AuthError::configuration(format!(
                "issuer scheme {other:?} is not allowed; use https"
            ))),
        }
    }

    /// Builds `{issuer}/.well-known/openid-configuration`.
    fn discovery_url(&self) -> Url {
        let mut url = self.issuer.clone();
        let path = self.issuer.path().trim_end_matches('/');
        url.set_path(&format!("{path}/.well-known/openid-configuration"));
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn document_json(issuer: &str) -> serde_json::Value {
        serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/auth"),
            "token_endpoint": format!("{issuer}/token"),
            "jwks_uri": format!("{issuer}/certs"),
            "end_session_endpoint": format!("{issuer}/logout"),
        })
    }

    #[test]
    fn test_parse_document_subset() {
        let json = r#"{
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/auth",
            "token_endpoint": "https://auth.example.com/token",
            "jwks_uri": "https://auth.example.com/certs",
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code", "refresh_token"]
        }"#;

        let doc: DiscoveryDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.issuer, "https://auth.example.com");
        assert_eq!(doc.token_endpoint, "https://auth.example.com/token");
        assert!(doc.end_session_endpoint.is_none());
    }

    #[test]
    fn test_discovery_url_construction() {
        let cache = DiscoveryCache::new(
            Url::parse("https://auth.example.com/realms/main").unwrap(),
            DiscoveryCacheConfig::default(),
        );
        assert_eq!(
            cache.discovery_url().as_str(),
            "https://auth.example.com/realms/main/.well-known/openid-configuration"
        );

        // A trailing slash on the issuer does not double up.
        let cache = DiscoveryCache::new(
            Url::parse("https://auth.example.com/").unwrap(),
            DiscoveryCacheConfig::default(),
        );
        assert_eq!(
            cache.discovery_url().as_str(),
            "https://auth.example.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_http_scheme_rejected_by_default() {
        let cache = DiscoveryCache::new(
            Url::parse("http://auth.example.com").unwrap(),
            DiscoveryCacheConfig::default(),
        );
        assert!(cache.validate_scheme().is_err());

        let cache = DiscoveryCache::new(
            Url::parse("http://auth.example.com").unwrap(),
            DiscoveryCacheConfig::default().with_allow_http(true),
        );
        assert!(cache.validate_scheme().is_ok());
    }

    #[tokio::test]
    async fn test_fetch_and_cache() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_json(&server.uri())))
            .expect(1)
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new(
            Url::parse(&server.uri()).unwrap(),
            DiscoveryCacheConfig::default().with_allow_http(true),
        );

        let doc = cache.get().await.unwrap();
        assert_eq!(doc.token_endpoint, format!("{}/token", server.uri()));

        // Second call is served from cache; the mock's expect(1) verifies it.
        let doc = cache.get().await.unwrap();
        assert_eq!(doc.jwks_uri, format!("{}/certs", server.uri()));
    }

    #[tokio::test]
    async fn test_issuer_mismatch_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(document_json("https://somewhere-else.example.com")),
            )
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new(
            Url::parse(&server.uri()).unwrap(),
            DiscoveryCacheConfig::default().with_allow_http(true),
        );

        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_fetch_error_is_retryable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new(
            Url::parse(&server.uri()).unwrap(),
            DiscoveryCacheConfig::default().with_allow_http(true),
        );

        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, AuthError::DiscoveryUnavailable { .. }));
        assert!(err.is_retryable());
    }
}
