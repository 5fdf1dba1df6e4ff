//! Token-set types and the token-endpoint client.
//!
//! [`TokenSet`] is the session-owned bundle of credentials returned by the
//! provider: access token, optional refresh token, ID token, and their
//! expiries. It is replaced wholesale on refresh, never patched.
//!
//! [`TokenEndpointClient`] performs the server-to-server calls to the
//! provider's token endpoint (`authorization_code` and `refresh_token`
//! grants). The client secret only ever travels over this channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::error::{AuthError, AuthResult};
use crate::pkce::PkceVerifier;

/// Wire-format token response from the provider's token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// The token type (usually "Bearer").
    #[serde(default)]
    pub token_type: Option<String>,

    /// Access-token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// The rotated refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Refresh-token lifetime in seconds.
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,

    /// The signed ID token. Present on `authorization_code` responses;
    /// providers may omit it on refresh.
    #[serde(default)]
    pub id_token: Option<String>,

    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error response body from the provider.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// The session-owned credential bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    /// Bearer token presented to the resource API.
    pub access_token: String,

    /// Single-use refresh token; replaced on every rotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// The signed, claims-bearing ID token.
    pub id_token: String,

    /// When the access token expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// When the refresh token expires, if the provider said.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub refresh_expires_at: Option<OffsetDateTime>,
}

/// Fallback access-token lifetime when the provider omits `expires_in`.
const DEFAULT_ACCESS_LIFETIME: Duration = Duration::from_secs(300);

impl TokenSet {
    /// Builds a token set from a wire response received at instant `now`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedToken` when the response lacks an ID token and no
    /// previous one is supplied to carry over (refresh responses may omit
    /// it; the initial exchange must not).
    pub fn from_response(
        response: TokenResponse,
        previous_id_token: Option<String>,
        now: OffsetDateTime,
    ) -> AuthResult<Self> {
        let id_token = response
            .id_token
            .or(previous_id_token)
            .ok_or_else(|| AuthError::malformed_token("token response carries no id_token"))?;

        let lifetime = response
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_ACCESS_LIFETIME);

        Ok(Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token,
            expires_at: now + lifetime,
            refresh_expires_at: response
                .refresh_expires_in
                .map(|secs| now + Duration::from_secs(secs)),
        })
    }

    /// Returns `true` if the access token has expired as of `now`.
    #[must_use]
    pub fn is_access_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the refresh token has expired as of `now`.
    /// A token set without a refresh expiry never expires locally.
    #[must_use]
    pub fn is_refresh_expired(&self, now: OffsetDateTime) -> bool {
        self.refresh_expires_at.is_some_and(|exp| now >= exp)
    }
}

/// What the token endpoint is being asked to redeem. Determines how an
/// `invalid_grant` rejection is surfaced.
enum GrantKind {
    AuthorizationCode,
    RefreshToken,
}

/// Server-to-server client for the provider's token endpoint.
pub struct TokenEndpointClient {
    http_client: reqwest::Client,
    token_endpoint: Url,
    client_id: String,
    client_secret: String,
    redirect_uri: Url,
}

impl TokenEndpointClient {
    /// Creates a client for the given token endpoint.
    ///
    /// `http_client` is shared with the caller; `reqwest::Client` is cheap
    /// to clone and carries the configured request timeout.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        token_endpoint: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Url,
    ) -> Self {
        Self {
            http_client,
            token_endpoint,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri,
        }
    }

    /// Exchanges an authorization code for a token set.
    ///
    /// # Errors
    ///
    /// - `AuthorizationCodeReused` when the provider rejects the code with
    ///   `invalid_grant` (codes are single-use; the provider enforces it).
    /// - `ProviderError` for any other OAuth error response.
    /// - `TokenExchangeUnavailable` for network-layer failures.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &PkceVerifier,
    ) -> AuthResult<TokenResponse> {
        let redirect_uri = self.redirect_uri.to_string();
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code_verifier", pkce_verifier.as_str()),
        ];

        tracing::debug!(endpoint = %self.token_endpoint, "Exchanging authorization code");
        self.post(&params, GrantKind::AuthorizationCode).await
    }

    /// Exchanges a refresh token for a new token set.
    ///
    /// # Errors
    ///
    /// - `RefreshTokenInvalid` when the provider rejects the token with
    ///   `invalid_grant`.
    /// - `ProviderError` for any other OAuth error response.
    /// - `TokenExchangeUnavailable` for network-layer failures.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        tracing::debug!(endpoint = %self.token_endpoint, "Refreshing token set");
        self.post(&params, GrantKind::RefreshToken).await
    }

    async fn post(
        &self,
        params: &[(&str, &str)],
        grant: GrantKind,
    ) -> AuthResult<TokenResponse> {
        let response = self
            .http_client
            .post(self.token_endpoint.as_str())
            .form(params)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(endpoint = %self.token_endpoint, error = %e, "Token endpoint unreachable");
                AuthError::token_exchange_unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();

            if let Ok(oauth) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                // Single-use grants: the provider rejects a replayed code or
                // an already-rotated refresh token as invalid_grant.
                if oauth.error == "invalid_grant" {
                    return Err(match grant {
                        GrantKind::AuthorizationCode => AuthError::AuthorizationCodeReused,
                        GrantKind::RefreshToken => AuthError::RefreshTokenInvalid,
                    });
                }
                return Err(AuthError::provider_error(
                    oauth.error,
                    oauth.error_description.unwrap_or_default(),
                ));
            }

            return Err(AuthError::provider_error(
                format!("http_{status}"),
                "token endpoint returned a non-OAuth error body",
            ));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::malformed_token(format!("token response did not parse: {e}")))
    }
}
