//! Refresh-token rotation.
//!
//! [`RefreshManager`] exchanges a session's refresh token for a new
//! [`TokenSet`](crate::token::TokenSet). Providers invalidate a refresh
//! token on first use, so:
//!
//! - at most one refresh is in flight per session; a losing concurrent
//!   caller fails fast with `RefreshInProgress` instead of racing the
//!   provider,
//! - on success the whole token set is replaced atomically and the old
//!   refresh token is never retained,
//! - on `RefreshTokenExpired` / `RefreshTokenInvalid` the session drops to
//!   unauthenticated and the caller must restart the login flow.
//!
//! The exchange-and-commit step runs in a spawned task so a disconnecting
//! caller cannot leave the session half-updated.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::discovery::DiscoveryCache;
use crate::error::{AuthError, AuthResult};
use crate::provider::ProviderConfig;
use crate::session::SessionStore;
use crate::token::{TokenEndpointClient, TokenSet};

/// Rotates refresh tokens for browser sessions.
pub struct RefreshManager {
    config: Arc<ProviderConfig>,
    discovery: Arc<DiscoveryCache>,
    sessions: Arc<SessionStore>,
    http_client: reqwest::Client,
}

impl RefreshManager {
    /// Creates a refresh manager.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(
        config: Arc<ProviderConfig>,
        discovery: Arc<DiscoveryCache>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.exchange_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            discovery,
            sessions,
            http_client,
        }
    }

    /// Exchanges the session's refresh token for a new token set.
    ///
    /// Returns the new set, which has already replaced the session's
    /// previous one when this returns.
    ///
    /// # Errors
    ///
    /// - `RefreshInProgress` - another refresh for this session holds the
    ///   lock; retry after it settles.
    /// - `RefreshTokenExpired` - the stored refresh expiry has passed; the
    ///   session is now unauthenticated.
    /// - `RefreshTokenInvalid` - the provider rejected the token; the
    ///   session is now unauthenticated.
    /// - `TokenExchangeUnavailable` - network failure; the session keeps
    ///   its previous token set and the call may be retried.
    /// - `Unauthenticated` - unknown session or no refresh token held.
    pub async fn refresh(&self, session_id: &str) -> AuthResult<TokenSet> {
        let lock = self
            .sessions
            .refresh_lock(session_id)
            .await
            .ok_or_else(|| AuthError::unauthenticated("unknown session"))?;

        // At-most-one in-flight refresh per session. The guard travels into
        // the commit task and is released only once the outcome is stored.
        let guard = lock
            .try_lock_owned()
            .map_err(|_| AuthError::RefreshInProgress)?;

        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| AuthError::unauthenticated("unknown session"))?;
        let tokens = session
            .tokens
            .ok_or_else(|| AuthError::unauthenticated("session holds no tokens"))?;
        let Some(refresh_token) = tokens.refresh_token.clone() else {
            return Err(AuthError::unauthenticated("session holds no refresh token"));
        };

        if tokens.is_refresh_expired(OffsetDateTime::now_utc()) {
            self.sessions.clear_tokens(session_id).await;
            return Err(AuthError::RefreshTokenExpired);
        }

        let doc = self.discovery.get().await?;
        let token_endpoint = self.config.resolve_token_endpoint(&doc)?;
        let token_client = TokenEndpointClient::new(
            self.http_client.clone(),
            token_endpoint,
            self.config.client_id.clone(),
            self.config.client_secret.clone(),
            self.config.redirect_uri.clone(),
        );

        let sessions = self.sessions.clone();
        let session_id = session_id.to_string();
        let previous_id_token = tokens.id_token.clone();

        // Session mutation must complete even if the caller is gone.
        let commit = tokio::spawn(async move {
            let _guard = guard;

            let result = token_client.refresh(&refresh_token).await;
            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    if matches!(
                        err,
                        AuthError::RefreshTokenInvalid | AuthError::RefreshTokenExpired
                    ) {
                        // The rotation is dead; the session must re-login.
                        sessions.clear_tokens(&session_id).await;
                        tracing::info!(session_id, "Refresh rejected, session unauthenticated");
                    }
                    return Err(err);
                }
            };

            let new_set = TokenSet::from_response(
                response,
                Some(previous_id_token),
                OffsetDateTime::now_utc(),
            )?;

            // Wholesale replacement: committing the new set is the moment
            // the old refresh token ceases to exist on our side.
            sessions.store_tokens(&session_id, new_set.clone()).await?;

            tracing::debug!(session_id, "Token set rotated");
            Ok(new_set)
        });

        commit
            .await
            .map_err(|e| AuthError::internal(format!("refresh task failed: {e}")))?
    }
}
