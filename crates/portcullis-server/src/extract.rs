//! Request extractors.
//!
//! [`BearerClaims`] validates the `Authorization: Bearer` header and hands
//! the handler verified claims; its rejection is an [`ApiError`], so a
//! missing or invalid token answers 401 before the handler runs. The scope
//! gate runs *inside* handlers, after this extractor, which is what keeps
//! 401 and 403 apart.
//!
//! [`SessionCookie`] reads the opaque session id from the browser cookie.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

use portcullis_auth::{AudienceCheck, AuthError, Claims};

use crate::error::ApiError;
use crate::state::AppState;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "portcullis_session";

/// Extracts validated claims from a Bearer token.
///
/// # Example
///
/// ```ignore
/// async fn profile(BearerClaims(claims): BearerClaims) -> impl IntoResponse {
///     format!("Hello, {}", claims.display_name())
/// }
/// ```
pub struct BearerClaims(pub Claims);

impl<S> FromRequestParts<S> for BearerClaims
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AuthError::unauthenticated("missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| AuthError::unauthenticated("Authorization header is not a Bearer token"))?
            .trim();

        if token.is_empty() {
            return Err(AuthError::unauthenticated("empty bearer token").into());
        }

        // Keycloak-style access tokens may omit the audience; when one is
        // present it must still name this client.
        let claims = state
            .validator
            .validate(token, AudienceCheck::AllowMissing(&state.client_id))
            .await?;

        Ok(Self(claims))
    }
}

/// Extracts the session id from the session cookie, if one is present.
pub struct SessionCookie(pub Option<String>);

impl<S> FromRequestParts<S> for SessionCookie
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        Ok(Self(
            jar.get(SESSION_COOKIE).map(|c| c.value().to_string()),
        ))
    }
}
