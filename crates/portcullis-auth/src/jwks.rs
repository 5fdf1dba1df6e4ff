//! Signing-key resolution and caching.
//!
//! [`KeyResolver`] fetches the provider's published JSON Web Key Set and
//! caches it in memory. Lookups are by key id (`kid`); a miss triggers one
//! forced refresh before failing, so provider key rotation is picked up
//! without restarting the process.
//!
//! # Cache behavior
//!
//! - The cached set is replaced atomically on refresh; concurrent readers
//!   never observe a partially updated set.
//! - The TTL honors the provider's `Cache-Control: max-age` header, clamped
//!   between configurable minimum and maximum bounds (default 1 hour when
//!   the header is absent).
//! - Network failures surface as `KeyFetchUnavailable` and are retryable by
//!   the caller; a key id that is still missing after refresh surfaces as
//!   the terminal `UnknownSigningKey`.

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use url::Url;

use crate::error::{AuthError, AuthResult};

/// Configuration for the key resolver cache.
#[derive(Debug, Clone)]
pub struct KeyResolverConfig {
    /// TTL when the provider sends no `Cache-Control` header (default: 1 hour).
    pub default_ttl: Duration,

    /// Maximum TTL regardless of `Cache-Control` (default: 24 hours).
    pub max_ttl: Duration,

    /// Minimum TTL regardless of `Cache-Control` (default: 5 minutes).
    pub min_ttl: Duration,

    /// HTTP request timeout (default: 10 seconds).
    pub request_timeout: Duration,

    /// Whether to allow a plain-HTTP JWKS endpoint (testing only).
    pub allow_http: bool,
}

impl Default for KeyResolverConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(86400),
            min_ttl: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
            allow_http: false,
        }
    }
}

impl KeyResolverConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TTL used when `Cache-Control` is absent.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the maximum TTL.
    #[must_use]
    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    /// Sets the minimum TTL.
    #[must_use]
    pub fn with_min_ttl(mut self, ttl: Duration) -> Self {
        self.min_ttl = ttl;
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Allows a plain-HTTP JWKS endpoint (testing only).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// The cached key set with its fetch metadata.
struct CachedKeySet {
    keys: JwkSet,
    expires_at: Instant,
}

/// A resolved signing key ready for signature verification.
#[derive(Debug)]
pub struct ResolvedKey {
    /// The decoding key for `jsonwebtoken`.
    pub key: DecodingKey,
    /// The algorithm the JWK declares, when present.
    pub algorithm: Option<Algorithm>,
}

/// Fetches and caches the provider's signing keys, resolving them by key id.
pub struct KeyResolver {
    jwks_uri: Url,
    http_client: reqwest::Client,
    cache: RwLock<Option<CachedKeySet>>,
    config: KeyResolverConfig,
}

impl KeyResolver {
    /// Creates a new resolver for the given JWKS endpoint.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(jwks_uri: Url, config: KeyResolverConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            jwks_uri,
            http_client,
            cache: RwLock::new(None),
            config,
        }
    }

    /// Resolves a signing key by key id.
    ///
    /// Checks the cache first. On a miss (or an expired cache) the full key
    /// set is re-fetched once and the lookup retried.
    ///
    /// # Errors
    ///
    /// - `KeyFetchUnavailable` when the key set cannot be fetched.
    /// - `UnknownSigningKey` when the key id is absent even after refresh.
    pub async fn resolve(&self, kid: &str) -> AuthResult<ResolvedKey> {
        if let Some(found) = self.lookup_cached(kid).await? {
            tracing::trace!(kid, "Signing key cache hit");
            return Ok(found);
        }

        tracing::debug!(kid, "Signing key cache miss, refreshing key set");
        self.refresh().await?;

        match self.lookup_cached(kid).await? {
            Some(found) => Ok(found),
            None => Err(AuthError::unknown_signing_key(kid)),
        }
    }

    /// Looks up a key in the cache without fetching. Returns `None` when the
    /// cache is empty, expired, or does not contain the key id.
    async fn lookup_cached(&self, kid: &str) -> AuthResult<Option<ResolvedKey>> {
        let cache = self.cache.read().await;
        let Some(cached) = cache.as_ref() else {
            return Ok(None);
        };
        if Instant::now() >= cached.expires_at {
            return Ok(None);
        }

        let Some(jwk) = cached
            .keys
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
        else {
            return Ok(None);
        };

        let key = DecodingKey::from_jwk(jwk).map_err(|e| {
            AuthError::key_fetch_unavailable(format!("unusable JWK for kid {kid:?}: {e}"))
        })?;

        Ok(Some(ResolvedKey {
            key,
            algorithm: jwk_algorithm(jwk),
        }))
    }

    /// Fetches the key set from the JWKS endpoint and replaces the cache.
    ///
    /// # Errors
    ///
    /// Returns `KeyFetchUnavailable` for network, HTTP-status, and parse
    /// failures, and `Configuration` for a disallowed endpoint scheme.
    pub async fn refresh(&self) -> AuthResult<()> {
        self.validate_scheme()?;

        let response = self
            .http_client
            .get(self.jwks_uri.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(uri = %self.jwks_uri, error = %e, "JWKS fetch failed");
                AuthError::key_fetch_unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(AuthError::key_fetch_unavailable(format!(
                "HTTP status {}",
                response.status().as_u16()
            )));
        }

        let ttl = self.ttl_from_headers(response.headers());

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::key_fetch_unavailable(format!("parse failure: {e}")))?;

        tracing::debug!(
            uri = %self.jwks_uri,
            key_count = keys.keys.len(),
            ttl_secs = ttl.as_secs(),
            "Cached provider key set"
        );

        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeySet {
            keys,
            expires_at: Instant::now() + ttl,
        });

        Ok(())
    }

    /// Drops the cached key set so the next resolve fetches a fresh copy.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    fn validate_scheme(&self) -> AuthResult<()> {
        match self.jwks_uri.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_http => Ok(()),
            other => Err(AuthError::configuration(format!(
                "jwks_uri scheme {other:?} is not allowed; use https"
            ))),
        }
    }

    /// Derives the cache TTL from `Cache-Control: max-age`, clamped between
    /// the configured minimum and maximum bounds.
    fn ttl_from_headers(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let ttl = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(',').find_map(|directive| {
                    directive
                        .trim()
                        .strip_prefix("max-age=")
                        .and_then(|secs| secs.parse::<u64>().ok())
                })
            })
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl);

        ttl.clamp(self.config.min_ttl, self.config.max_ttl)
    }
}

/// Extracts the signing algorithm a JWK declares.
fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}
