//! Bearer and ID token validation.
//!
//! [`TokenValidator`] verifies a signed token end to end: structure, signature
//! (against a key resolved by `kid`), issuer, audience, and the validity
//! window. Each check fails with its own error kind so callers can tell a
//! forged token from an expired one.
//!
//! Validation is a pure function of the token, the current time, and the
//! cached keys: [`TokenValidator::validate_at`] takes the clock as an
//! argument, so tests run against a fixed instant. No network call happens
//! during validation other than the key lookup itself.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Validation, decode, decode_header};
use time::OffsetDateTime;

use crate::claims::Claims;
use crate::error::{AuthError, AuthResult};
use crate::jwks::KeyResolver;

/// How the audience claim is checked.
///
/// ID tokens must always carry the client id in their audience. Access
/// tokens from providers that follow the opaque-introspection convention may
/// omit the claim entirely; `AllowMissing` tolerates that, but still checks
/// the value when one is present.
#[derive(Debug, Clone, Copy)]
pub enum AudienceCheck<'a> {
    /// The audience claim must be present and contain the expected value.
    Required(&'a str),
    /// An absent audience claim is tolerated; a present one must contain
    /// the expected value.
    AllowMissing(&'a str),
}

/// Validates signed tokens against one provider's issuer and key set.
pub struct TokenValidator {
    resolver: Arc<KeyResolver>,
    required_issuer: String,
    leeway: Duration,
}

impl TokenValidator {
    /// Default clock-skew allowance applied to `exp` and `nbf` checks.
    pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

    /// Creates a validator for the given issuer, resolving keys through
    /// `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<KeyResolver>, required_issuer: impl Into<String>) -> Self {
        Self {
            resolver,
            required_issuer: required_issuer.into(),
            leeway: Self::DEFAULT_LEEWAY,
        }
    }

    /// Sets the clock-skew allowance.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Validates a token against the current wall clock.
    ///
    /// # Errors
    ///
    /// See [`TokenValidator::validate_at`].
    pub async fn validate(&self, token: &str, audience: AudienceCheck<'_>) -> AuthResult<Claims> {
        self.validate_at(token, audience, OffsetDateTime::now_utc())
            .await
    }

    /// Validates a token as of the instant `now`.
    ///
    /// Checks run signature-first: structure, key resolution, signature,
    /// then issuer, audience, and the `[nbf, exp]` window with the
    /// configured skew allowance.
    ///
    /// # Errors
    ///
    /// - `MalformedToken` - not a structurally valid JWT, or missing `kid`.
    /// - `UnknownSigningKey` / `KeyFetchUnavailable` - from key resolution.
    /// - `InvalidSignature` - signature does not verify.
    /// - `IssuerMismatch`, `AudienceMismatch`, `TokenExpired`,
    ///   `TokenNotYetValid` - the corresponding claim check failed.
    pub async fn validate_at(
        &self,
        token: &str,
        audience: AudienceCheck<'_>,
        now: OffsetDateTime,
    ) -> AuthResult<Claims> {
        let header = decode_header(token)
            .map_err(|e| AuthError::malformed_token(format!("invalid JWT header: {e}")))?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::malformed_token("token header carries no kid"))?;

        let resolved = self.resolver.resolve(kid).await?;
        let alg = resolved.algorithm.unwrap_or(header.alg);

        // Signature and structure only; the claim checks below run against
        // the explicit `now` so validation stays deterministic under test.
        let mut validation = Validation::new(alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(token, &resolved.key, &validation).map_err(map_jwt_error)?;
        let claims = data.claims;

        if claims.iss != self.required_issuer {
            return Err(AuthError::issuer_mismatch(&self.required_issuer, &claims.iss));
        }

        match audience {
            AudienceCheck::Required(expected) => {
                if !claims.has_audience(expected) {
                    return Err(AuthError::audience_mismatch(expected));
                }
            }
            AudienceCheck::AllowMissing(expected) => {
                if !claims.aud.is_empty() && !claims.has_audience(expected) {
                    return Err(AuthError::audience_mismatch(expected));
                }
            }
        }

        let leeway = time::Duration::try_from(self.leeway)
            .unwrap_or(time::Duration::seconds(60));

        let expires_at = claims.expires_at();
        if now > expires_at + leeway {
            return Err(AuthError::TokenExpired {
                expired_at: expires_at,
            });
        }

        if let Some(not_before) = claims.not_before()
            && now + leeway < not_before
        {
            return Err(AuthError::TokenNotYetValid { not_before });
        }

        tracing::trace!(sub = %claims.sub, "Token validated");
        Ok(claims)
    }
}

/// Maps a `jsonwebtoken` failure to the relying-party error taxonomy.
///
/// Signature failures stay distinct from structural ones; nothing from the
/// token body leaks into the message.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
        _ => AuthError::malformed_token(format!("token did not decode: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwks::KeyResolverConfig;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ISSUER: &str = "https://auth.example.com/realms/main";
    const CLIENT_ID: &str = "portcullis-web";
    const SIGNING_SECRET: &[u8] = b"secret-signing-key-secret-signing-key";

    fn jwks_json() -> serde_json::Value {
        use base64::Engine;
        serde_json::json!({
            "keys": [{
                "kty": "oct",
                "kid": "test-key",
                "alg": "HS256",
                "k": base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(SIGNING_SECRET),
            }]
        })
    }

    fn sign_token(claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("test-key".to_string());
        encode(&header, claims, &EncodingKey::from_secret(SIGNING_SECRET)).unwrap()
    }

    async fn validator_against(server: &MockServer) -> TokenValidator {
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json()))
            .mount(server)
            .await;

        let resolver = Arc::new(KeyResolver::new(
            Url::parse(&format!("{}/certs", server.uri())).unwrap(),
            KeyResolverConfig::default().with_allow_http(true),
        ));
        TokenValidator::new(resolver, ISSUER)
    }

    fn base_claims(now: OffsetDateTime) -> serde_json::Value {
        serde_json::json!({
            "iss": ISSUER,
            "sub": "abc123",
            "aud": CLIENT_ID,
            "exp": now.unix_timestamp() + 300,
            "iat": now.unix_timestamp(),
            "scope": "openid profile vegbank:contributor",
        })
    }

    #[tokio::test]
    async fn test_valid_token() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;
        let now = OffsetDateTime::now_utc();

        let token = sign_token(&base_claims(now));
        let claims = validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap();

        assert_eq!(claims.sub, "abc123");
        assert!(claims.has_scope("vegbank:contributor"));
    }

    #[tokio::test]
    async fn test_expired_beyond_skew() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;
        let now = OffsetDateTime::now_utc();

        let mut claims = base_claims(now);
        claims["exp"] = serde_json::json!(now.unix_timestamp() - 120);
        let token = sign_token(&claims);

        let err = validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired { .. }));
    }

    #[tokio::test]
    async fn test_expired_within_skew_tolerated() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;
        let now = OffsetDateTime::now_utc();

        let mut claims = base_claims(now);
        claims["exp"] = serde_json::json!(now.unix_timestamp() - 30);
        let token = sign_token(&claims);

        validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_not_yet_valid() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;
        let now = OffsetDateTime::now_utc();

        let mut claims = base_claims(now);
        claims["nbf"] = serde_json::json!(now.unix_timestamp() + 300);
        let token = sign_token(&claims);

        let err = validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenNotYetValid { .. }));
    }

    #[tokio::test]
    async fn test_issuer_mismatch() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;
        let now = OffsetDateTime::now_utc();

        let mut claims = base_claims(now);
        claims["iss"] = serde_json::json!("https://rogue.example.com");
        let token = sign_token(&claims);

        let err = validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::IssuerMismatch { .. }));
    }

    #[tokio::test]
    async fn test_audience_mismatch() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;
        let now = OffsetDateTime::now_utc();

        let mut claims = base_claims(now);
        claims["aud"] = serde_json::json!("some-other-client");
        let token = sign_token(&claims);

        let err = validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AudienceMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_audience_modes() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;
        let now = OffsetDateTime::now_utc();

        let mut claims = base_claims(now);
        claims.as_object_mut().unwrap().remove("aud");
        let token = sign_token(&claims);

        // An ID token must carry the audience.
        let err = validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AudienceMismatch { .. }));

        // An access token without one passes in AllowMissing mode.
        validator
            .validate_at(&token, AudienceCheck::AllowMissing(CLIENT_ID), now)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wrong_signing_secret() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;
        let now = OffsetDateTime::now_utc();

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("test-key".to_string());
        let token = encode(
            &header,
            &base_claims(now),
            &EncodingKey::from_secret(b"a-completely-different-signing-secret"),
        )
        .unwrap();

        let err = validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;
        let now = OffsetDateTime::now_utc();

        let err = validator
            .validate_at("not-a-jwt", AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken { .. }));
    }

    #[tokio::test]
    async fn test_missing_kid_is_malformed() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;
        let now = OffsetDateTime::now_utc();

        let header = Header::new(Algorithm::HS256);
        let token = encode(
            &header,
            &base_claims(now),
            &EncodingKey::from_secret(SIGNING_SECRET),
        )
        .unwrap();

        let err = validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken { .. }));
    }

    #[tokio::test]
    async fn test_unknown_kid_after_single_refresh() {
        let server = MockServer::start().await;
        // Two fetches total: one for the initial miss, one forced retry.
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json()))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = Arc::new(KeyResolver::new(
            Url::parse(&format!("{}/certs", server.uri())).unwrap(),
            KeyResolverConfig::default().with_allow_http(true),
        ));
        let validator = TokenValidator::new(resolver.clone(), ISSUER);
        let now = OffsetDateTime::now_utc();

        // Warm the cache with the known key.
        let token = sign_token(&base_claims(now));
        validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap();

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("rotated-away".to_string());
        let token = encode(
            &header,
            &base_claims(now),
            &EncodingKey::from_secret(SIGNING_SECRET),
        )
        .unwrap();

        let err = validator
            .validate_at(&token, AudienceCheck::Required(CLIENT_ID), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownSigningKey { .. }));
    }

    #[tokio::test]
    async fn test_validation_is_deterministic_for_fixed_clock() {
        let server = MockServer::start().await;
        let validator = validator_against(&server).await;

        let fixed_now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let mut claims = base_claims(fixed_now);
        claims["exp"] = serde_json::json!(fixed_now.unix_timestamp() + 60);
        let token = sign_token(&claims);

        for _ in 0..3 {
            let claims = validator
                .validate_at(&token, AudienceCheck::Required(CLIENT_ID), fixed_now)
                .await
                .unwrap();
            assert_eq!(claims.sub, "abc123");
        }

        // The same token one hour later is expired, every time.
        let later = fixed_now + time::Duration::hours(1);
        for _ in 0..3 {
            let err = validator
                .validate_at(&token, AudienceCheck::Required(CLIENT_ID), later)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::TokenExpired { .. }));
        }
    }
}
