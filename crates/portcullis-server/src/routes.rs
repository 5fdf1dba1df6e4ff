//! HTTP routes.
//!
//! The route set mirrors a classic relying-party app:
//!
//! - `GET /` - welcome document, reports login status
//! - `GET /login` - starts the authorization-code flow (302 to provider)
//! - `GET /authorize` - the provider callback (302 to `/dashboard`)
//! - `GET /dashboard` - session-cookie authenticated user info
//! - `GET /logout` - destroys the session, best-effort provider logout
//! - `GET /profile` - bearer-token resource gated on the required scope
//!
//! The routing layer stays thin: each handler invokes one named operation
//! on the auth core and maps the outcome to a response.

use axum::Router;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::json;
use tower_http::trace::TraceLayer;

use portcullis_auth::{AudienceCheck, AuthError, CallbackParams, Claims};

use crate::error::ApiError;
use crate::extract::{BearerClaims, SESSION_COOKIE, SessionCookie};
use crate::state::AppState;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/login", get(login))
        .route("/authorize", get(authorize))
        .route("/dashboard", get(dashboard))
        .route("/logout", get(logout))
        .route("/profile", get(profile))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Welcome document; reports whether the caller's session is logged in.
async fn index(
    State(state): State<AppState>,
    SessionCookie(session_id): SessionCookie,
) -> Json<serde_json::Value> {
    let authenticated = match session_id {
        Some(id) => state
            .sessions
            .get(&id)
            .await
            .is_some_and(|s| s.is_authenticated()),
        None => false,
    };

    Json(json!({
        "message": if authenticated {
            "Welcome back. Visit /dashboard for your profile."
        } else {
            "Welcome. Visit /login to sign in."
        },
        "authenticated": authenticated,
    }))
}

/// Starts a login attempt and redirects the user agent to the provider.
async fn login(
    State(state): State<AppState>,
    SessionCookie(session_id): SessionCookie,
) -> Result<Response, ApiError> {
    // Reuse a live session so a re-login replaces the pending attempt
    // instead of orphaning the old session entry.
    let session = match session_id {
        Some(id) => state.sessions.get(&id).await,
        None => None,
    };
    let session = match session {
        Some(session) => session,
        None => state.sessions.create().await,
    };

    let redirect = state.flow.start_login(&session.id).await?;

    let cookie = Cookie::build((SESSION_COOKIE, session.id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    let jar = CookieJar::new().add(cookie);

    Ok((jar, Redirect::temporary(redirect.authorization_url.as_str())).into_response())
}

/// Provider callback: completes the flow and redirects to the dashboard.
async fn authorize(
    State(state): State<AppState>,
    SessionCookie(session_id): SessionCookie,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ApiError> {
    let session_id = session_id
        .ok_or_else(|| AuthError::unauthenticated("callback without a session cookie"))?;

    state.flow.handle_callback(&session_id, params).await?;
    Ok(Redirect::to("/dashboard"))
}

/// Session-cookie authenticated dashboard.
///
/// Validates the session's access token; when it has expired and a refresh
/// token is available, rotates the token set transparently. A session that
/// cannot be refreshed is sent back to `/login`.
async fn dashboard(
    State(state): State<AppState>,
    SessionCookie(session_id): SessionCookie,
) -> Result<Response, ApiError> {
    let Some(session_id) = session_id else {
        return Ok(Redirect::to("/login").into_response());
    };
    let Some(session) = state.sessions.get(&session_id).await else {
        return Ok(Redirect::to("/login").into_response());
    };
    let Some(tokens) = session.tokens else {
        return Ok(Redirect::to("/login").into_response());
    };

    let audience = AudienceCheck::AllowMissing(&state.client_id);
    let (claims, tokens) = match state.validator.validate(&tokens.access_token, audience).await {
        Ok(claims) => (claims, tokens),
        Err(AuthError::TokenExpired { .. }) if tokens.refresh_token.is_some() => {
            match state.refresh.refresh(&session_id).await {
                Ok(rotated) => {
                    let claims = state
                        .validator
                        .validate(&rotated.access_token, audience)
                        .await?;
                    (claims, rotated)
                }
                Err(err) if err.requires_login() => {
                    return Ok(Redirect::to("/login").into_response());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(err) if err.is_validation_error() => {
            return Ok(Redirect::to("/login").into_response());
        }
        Err(err) => return Err(err.into()),
    };

    Ok(Json(json!({
        "message": format!("Welcome, {}!", claims.display_name()),
        "user": {
            "name": claims.name,
            "email": claims.email,
            "sub": claims.sub,
        },
        "token": {
            "expires_at": tokens.expires_at.unix_timestamp(),
            "scope": claims.scope,
        },
    }))
    .into_response())
}

/// Destroys the local session and best-effort ends the provider session.
async fn logout(
    State(state): State<AppState>,
    SessionCookie(session_id): SessionCookie,
) -> Response {
    if let Some(session_id) = session_id {
        state.flow.logout(&session_id).await;
    }

    let jar = CookieJar::new().remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());
    (jar, Json(json!({ "message": "Logged out successfully" }))).into_response()
}

/// Bearer-protected resource, gated on the configured scope.
///
/// The [`BearerClaims`] extractor already answered 401 for anything that
/// failed validation; a validated token missing the scope gets 403 here.
async fn profile(
    State(state): State<AppState>,
    BearerClaims(claims): BearerClaims,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.gate.authorize(&claims).into_result()?;

    Ok(Json(json!({
        "message": format!("Authorization succeeded, {}", claims.display_name()),
        "claims": claims_view(&claims),
    })))
}

/// The claims subset echoed back by the resource endpoint.
fn claims_view(claims: &Claims) -> serde_json::Value {
    json!({
        "sub": claims.sub,
        "iss": claims.iss,
        "aud": claims.aud,
        "azp": claims.azp,
        "exp": claims.exp,
        "iat": claims.iat,
        "nbf": claims.nbf,
        "jti": claims.extra.get("jti"),
        "scope": claims.scope,
        "name": claims.name,
        "email": claims.email,
        "email_verified": claims.email_verified,
        "preferred_username": claims.preferred_username,
        "given_name": claims.given_name,
        "family_name": claims.family_name,
    })
}
