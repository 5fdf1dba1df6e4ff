//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use portcullis_auth::{
    AuthResult, DiscoveryCache, DiscoveryCacheConfig, KeyResolver, KeyResolverConfig, LoginFlow,
    RefreshManager, ScopeGate, SessionStore, TokenValidator,
};

use crate::config::AppConfig;

/// Everything the handlers need, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    /// Drives the login flow.
    pub flow: Arc<LoginFlow>,

    /// Rotates refresh tokens.
    pub refresh: Arc<RefreshManager>,

    /// Validates bearer and ID tokens.
    pub validator: Arc<TokenValidator>,

    /// Gates the protected resource on its required scope.
    pub gate: ScopeGate,

    /// Browser sessions.
    pub sessions: Arc<SessionStore>,

    /// This relying party's client id, for audience checks.
    pub client_id: String,
}

impl AppState {
    /// Builds the state from loaded configuration.
    ///
    /// Performs the startup discovery fetch to resolve the provider's JWKS
    /// endpoint; endpoints overridden in the configuration win over
    /// discovered ones.
    ///
    /// # Errors
    ///
    /// Returns discovery or configuration errors when the provider metadata
    /// cannot be resolved.
    pub async fn from_config(config: &AppConfig) -> AuthResult<Self> {
        let provider = Arc::new(config.provider.clone());

        let discovery = Arc::new(DiscoveryCache::new(
            provider.issuer.clone(),
            DiscoveryCacheConfig::default().with_allow_http(provider.allow_http),
        ));

        let doc = discovery.get().await?;
        let jwks_uri = provider.resolve_jwks_uri(&doc)?;
        tracing::info!(
            issuer = provider.issuer_str(),
            jwks_uri = %jwks_uri,
            "Provider metadata resolved"
        );

        let resolver = Arc::new(KeyResolver::new(
            jwks_uri,
            KeyResolverConfig::default().with_allow_http(provider.allow_http),
        ));
        let validator = Arc::new(TokenValidator::new(resolver, provider.issuer_str()));

        let sessions = Arc::new(SessionStore::with_ttls(
            Duration::from_secs(config.session.ttl_secs),
            Duration::from_secs(config.session.login_ttl_secs),
        ));

        let flow = Arc::new(LoginFlow::new(
            provider.clone(),
            discovery.clone(),
            validator.clone(),
            sessions.clone(),
        ));
        let refresh = Arc::new(RefreshManager::new(provider, discovery, sessions.clone()));

        Ok(Self {
            flow,
            refresh,
            validator,
            gate: ScopeGate::new(&config.resource.required_scope),
            sessions,
            client_id: config.provider.client_id.clone(),
        })
    }
}
