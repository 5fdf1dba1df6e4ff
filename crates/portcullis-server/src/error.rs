//! HTTP mapping for relying-party errors.
//!
//! [`ApiError`] wraps [`AuthError`] and implements `IntoResponse`, so
//! handlers and extractors can bubble errors with `?`. The mapping keeps
//! 401 and 403 distinguishable: authentication failures are 401 with a
//! `WWW-Authenticate: Bearer` header, a failed scope check is 403 without
//! one.

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use portcullis_auth::AuthError;

/// An `AuthError` on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = &self.0;
        let (status, oauth_code) = status_for(error);

        let body = json!({
            "error": error.kind(),
            "message": error.to_string(),
        });

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            let www_auth = format!(
                "Bearer realm=\"portcullis\", error=\"{}\", error_description=\"{}\"",
                oauth_code,
                error.to_string().replace('"', "\\\"")
            );
            if let Ok(value) = HeaderValue::from_str(&www_auth) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        if status.is_server_error() {
            tracing::error!(kind = error.kind(), error = %error, "Request failed");
        } else {
            tracing::debug!(kind = error.kind(), status = status.as_u16(), "Request rejected");
        }

        (status, headers, Json(body)).into_response()
    }
}

/// Maps an error kind to its HTTP status and OAuth error code.
fn status_for(error: &AuthError) -> (StatusCode, &'static str) {
    match error {
        // The request presented no usable credentials: 401.
        AuthError::MalformedToken { .. }
        | AuthError::InvalidSignature
        | AuthError::IssuerMismatch { .. }
        | AuthError::AudienceMismatch { .. }
        | AuthError::TokenExpired { .. }
        | AuthError::TokenNotYetValid { .. }
        | AuthError::UnknownSigningKey { .. } => (StatusCode::UNAUTHORIZED, "invalid_token"),

        AuthError::Unauthenticated { .. } => (StatusCode::UNAUTHORIZED, "unauthorized"),

        // Login-flow failures: the attempt is dead, restart from /login.
        AuthError::StateMismatch
        | AuthError::ReplayedState
        | AuthError::NonceMismatch
        | AuthError::AuthorizationCodeReused
        | AuthError::ProviderError { .. } => (StatusCode::UNAUTHORIZED, "invalid_grant"),

        AuthError::RefreshTokenExpired | AuthError::RefreshTokenInvalid => {
            (StatusCode::UNAUTHORIZED, "invalid_grant")
        }

        // Validated but not allowed: 403, no WWW-Authenticate.
        AuthError::InsufficientScope { .. } => (StatusCode::FORBIDDEN, "insufficient_scope"),

        // Another caller is already refreshing this session.
        AuthError::RefreshInProgress => (StatusCode::CONFLICT, "slow_down"),

        // The provider could not be reached: retryable upstream failure.
        AuthError::KeyFetchUnavailable { .. }
        | AuthError::TokenExchangeUnavailable { .. }
        | AuthError::DiscoveryUnavailable { .. } => (StatusCode::BAD_GATEWAY, "temporarily_unavailable"),

        AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_is_401_with_www_authenticate() {
        let response = ApiError(AuthError::unauthenticated("no bearer token")).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let www_auth = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(www_auth.starts_with("Bearer realm=\"portcullis\""));
        assert!(www_auth.contains("error=\"unauthorized\""));

        let body = body_json(response).await;
        assert_eq!(body["error"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_insufficient_scope_is_403_without_www_authenticate() {
        let response =
            ApiError(AuthError::insufficient_scope("vegbank:contributor")).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));

        let body = body_json(response).await;
        assert_eq!(body["error"], "insufficient_scope");
    }

    #[tokio::test]
    async fn test_expired_token_is_401_invalid_token() {
        let response = ApiError(AuthError::TokenExpired {
            expired_at: time::OffsetDateTime::UNIX_EPOCH,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let www_auth = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www_auth.contains("error=\"invalid_token\""));
    }

    #[tokio::test]
    async fn test_upstream_failures_are_502() {
        let response = ApiError(AuthError::key_fetch_unavailable("timeout")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = ApiError(AuthError::token_exchange_unavailable("refused")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_refresh_in_progress_is_409() {
        let response = ApiError(AuthError::RefreshInProgress).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_flow_errors_are_401() {
        for err in [
            AuthError::StateMismatch,
            AuthError::ReplayedState,
            AuthError::NonceMismatch,
            AuthError::AuthorizationCodeReused,
        ] {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }
}
