//! The authorization-code login flow.
//!
//! [`LoginFlow`] drives the three-legged OAuth 2.0 / OIDC code flow for a
//! browser session:
//!
//! 1. **Start** - [`LoginFlow::start_login`] generates `state`, `nonce`, and
//!    a PKCE verifier, binds them to the session, and returns the provider
//!    authorization URL to redirect the user agent to.
//! 2. **PendingCallback** - [`LoginFlow::handle_callback`] matches and
//!    consumes the single-use state, exchanges the code over the back
//!    channel (client secret never touches the user agent), checks the ID
//!    token's nonce, and runs it through the [`TokenValidator`].
//! 3. **Authenticated** - the session holds the [`TokenSet`]; the flow is
//!    done. **Failed** is terminal too: the attempt restarts from Start.
//!
//! The exchange-and-commit step runs in a spawned task, so a caller that
//! disconnects mid-callback cannot leave the session half-updated.

use std::sync::Arc;

use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;

use crate::claims::Claims;
use crate::discovery::DiscoveryCache;
use crate::error::{AuthError, AuthResult};
use crate::pkce::PkceChallenge;
use crate::provider::ProviderConfig;
use crate::session::{Session, SessionStore};
use crate::token::{TokenEndpointClient, TokenSet};
use crate::validator::{AudienceCheck, TokenValidator};

/// Position of a login attempt in the authorization-code flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No attempt in flight; login starts from here.
    Start,
    /// The user agent was redirected to the provider; the callback is
    /// awaited.
    PendingCallback,
    /// The session holds a token set. Terminal.
    Authenticated,
    /// The attempt consumed its state without establishing tokens.
    /// Terminal; restart from Start.
    Failed,
}

/// Derives the flow position from a session snapshot.
#[must_use]
pub fn flow_state(session: &Session) -> FlowState {
    match (&session.tokens, &session.pending_auth) {
        (Some(_), _) => FlowState::Authenticated,
        (None, Some(pending)) if pending.is_consumed() => FlowState::Failed,
        (None, Some(_)) => FlowState::PendingCallback,
        (None, None) => FlowState::Start,
    }
}

/// Query parameters the provider sends to the callback endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// The authorization code (present on success).
    pub code: Option<String>,
    /// The state value echoed back by the provider.
    pub state: Option<String>,
    /// OAuth error code, when the provider denied the request.
    pub error: Option<String>,
    /// Human-readable error description.
    pub error_description: Option<String>,
}

/// The redirect a started login attempt produces.
#[derive(Debug)]
pub struct LoginRedirect {
    /// The provider authorization URL to send the user agent to.
    pub authorization_url: Url,
    /// The state value bound to this attempt (exposed for tests/logging).
    pub state: String,
}

/// Drives the authorization-code flow for browser sessions.
pub struct LoginFlow {
    config: Arc<ProviderConfig>,
    discovery: Arc<DiscoveryCache>,
    validator: Arc<TokenValidator>,
    sessions: Arc<SessionStore>,
    http_client: reqwest::Client,
}

impl LoginFlow {
    /// Creates a flow controller.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(
        config: Arc<ProviderConfig>,
        discovery: Arc<DiscoveryCache>,
        validator: Arc<TokenValidator>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.exchange_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            discovery,
            validator,
            sessions,
            http_client,
        }
    }

    /// Starts a login attempt for the given session.
    ///
    /// Stores a fresh [`crate::session::AuthorizationState`] on the session
    /// (replacing any earlier attempt) and returns the authorization URL.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for an unknown session, and discovery or
    /// configuration errors when the authorization endpoint cannot be
    /// resolved.
    pub async fn start_login(&self, session_id: &str) -> AuthResult<LoginRedirect> {
        let doc = self.discovery.get().await?;
        let auth_endpoint = self.config.resolve_authorization_endpoint(&doc)?;

        let auth_state = self.sessions.begin_login(session_id).await?;
        let challenge = PkceChallenge::from_verifier(&auth_state.pkce_verifier);

        let mut url = auth_endpoint;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", self.config.redirect_uri.as_str());
            params.append_pair("scope", &self.config.scope_param());
            params.append_pair("state", &auth_state.state);
            params.append_pair("nonce", &auth_state.nonce);
            params.append_pair("code_challenge", challenge.as_str());
            params.append_pair("code_challenge_method", PkceChallenge::method());
        }

        tracing::debug!(
            session_id,
            endpoint = url.as_str().split('?').next().unwrap_or(""),
            "Login started, redirecting to provider"
        );

        Ok(LoginRedirect {
            state: auth_state.state,
            authorization_url: url,
        })
    }

    /// Handles the provider callback for the given session.
    ///
    /// On success the session transitions to Authenticated with the new
    /// token set stored, and the validated ID-token claims are returned.
    /// On any failure no tokens are stored and the attempt is terminal.
    ///
    /// # Errors
    ///
    /// - `ProviderError` - the provider reported an error (state untouched).
    /// - `StateMismatch` / `ReplayedState` - state verification failed.
    /// - `AuthorizationCodeReused` - the provider rejected the code.
    /// - `NonceMismatch` - the ID token is not bound to this attempt.
    /// - Validation errors from the [`TokenValidator`].
    pub async fn handle_callback(
        &self,
        session_id: &str,
        params: CallbackParams,
    ) -> AuthResult<Claims> {
        // A provider-reported denial arrives before any state is consumed;
        // the attempt stays pending and may legitimately be retried.
        if let Some(error) = params.error {
            tracing::warn!(session_id, error, "Provider reported authorization error");
            return Err(AuthError::provider_error(
                error,
                params.error_description.unwrap_or_default(),
            ));
        }

        let state = params.state.ok_or(AuthError::StateMismatch)?;
        let code = params.code.ok_or_else(|| {
            AuthError::provider_error("invalid_request", "callback carries no code")
        })?;

        let auth_state = self.sessions.consume_auth_state(session_id, &state).await?;

        let doc = self.discovery.get().await?;
        let token_endpoint = self.config.resolve_token_endpoint(&doc)?;
        let token_client = TokenEndpointClient::new(
            self.http_client.clone(),
            token_endpoint,
            self.config.client_id.clone(),
            self.config.client_secret.clone(),
            self.config.redirect_uri.clone(),
        );

        let validator = self.validator.clone();
        let sessions = self.sessions.clone();
        let client_id = self.config.client_id.clone();
        let session_id = session_id.to_string();

        // The exchange mutates session state; run it to completion even if
        // the caller goes away, and only report the outcome here.
        let commit = tokio::spawn(async move {
            let response = token_client.exchange_code(&code, &auth_state.pkce_verifier).await?;

            let id_token = response.id_token.clone().ok_or_else(|| {
                AuthError::malformed_token("token response carries no id_token")
            })?;

            let claims = validator
                .validate(&id_token, AudienceCheck::Required(&client_id))
                .await?;

            match claims.nonce.as_deref() {
                Some(nonce) if nonce == auth_state.nonce => {}
                _ => return Err(AuthError::NonceMismatch),
            }

            let tokens = TokenSet::from_response(response, None, OffsetDateTime::now_utc())?;
            sessions.store_tokens(&session_id, tokens).await?;

            tracing::info!(session_id, sub = %claims.sub, "Login completed");
            Ok(claims)
        });

        commit
            .await
            .map_err(|e| AuthError::internal(format!("callback task failed: {e}")))?
    }

    /// Destroys the session and best-effort ends the provider-side session.
    ///
    /// The local session is always destroyed first; a failing end-session
    /// call is logged and never surfaces to the caller.
    pub async fn logout(&self, session_id: &str) {
        let Some(session) = self.sessions.destroy(session_id).await else {
            return;
        };

        let Some(tokens) = session.tokens else {
            return;
        };

        let doc = match self.discovery.get().await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "End-session skipped, discovery failed");
                return;
            }
        };

        let Some(mut endpoint) = self.config.resolve_end_session_endpoint(&doc) else {
            tracing::debug!(session_id, "Provider has no end-session endpoint");
            return;
        };

        endpoint
            .query_pairs_mut()
            .append_pair("id_token_hint", &tokens.id_token)
            .append_pair("client_id", &self.config.client_id);

        match self.http_client.get(endpoint.as_str()).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(session_id, "Provider session ended");
            }
            Ok(response) => {
                tracing::warn!(
                    session_id,
                    status = response.status().as_u16(),
                    "End-session call rejected"
                );
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "End-session call failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AuthorizationState;
    use std::time::Duration;

    fn empty_session() -> Session {
        Session {
            id: "s-1".to_string(),
            pending_auth: None,
            tokens: None,
            created_at: OffsetDateTime::now_utc(),
            expires_at: OffsetDateTime::now_utc() + Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_flow_state_derivation() {
        let mut session = empty_session();
        assert_eq!(flow_state(&session), FlowState::Start);

        let mut pending = AuthorizationState::new(Duration::from_secs(600));
        session.pending_auth = Some(pending.clone());
        assert_eq!(flow_state(&session), FlowState::PendingCallback);

        pending.consumed_at = Some(OffsetDateTime::now_utc());
        session.pending_auth = Some(pending);
        assert_eq!(flow_state(&session), FlowState::Failed);

        session.tokens = Some(TokenSet {
            access_token: "at".to_string(),
            refresh_token: None,
            id_token: "idt".to_string(),
            expires_at: OffsetDateTime::now_utc(),
            refresh_expires_at: None,
        });
        assert_eq!(flow_state(&session), FlowState::Authenticated);
    }

    #[test]
    fn test_callback_params_deserialize() {
        let params: CallbackParams =
            serde_json::from_str(r#"{"code": "C1", "state": "S1"}"#).unwrap();
        assert_eq!(params.code.as_deref(), Some("C1"));
        assert!(params.error.is_none());

        let params: CallbackParams =
            serde_json::from_str(r#"{"error": "access_denied"}"#).unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert!(params.code.is_none());
    }
}
