//! Error types for relying-party operations.
//!
//! This module defines all error kinds that can occur during key resolution,
//! token validation, the authorization-code flow, token refresh, and scope
//! authorization. Each kind is stable so callers can decide whether to retry,
//! re-authenticate, or abort.
//!
//! # Security
//!
//! No variant carries raw token material or client secrets. Where a claim
//! triggered the failure, only that claim's value is included (e.g. the
//! expiry timestamp, never signature bytes).

use time::OffsetDateTime;

/// Errors that can occur during authentication and authorization operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token is not a structurally well-formed JWT.
    #[error("Malformed token: {message}")]
    MalformedToken {
        /// Description of the structural problem.
        message: String,
    },

    /// The token signature does not verify against the resolved key.
    #[error("Invalid token signature")]
    InvalidSignature,

    /// The token issuer does not match the required issuer exactly.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// The issuer the validator requires.
        expected: String,
        /// The issuer the token carries.
        actual: String,
    },

    /// The token audience does not contain the expected audience.
    #[error("Audience mismatch: token audience does not include {expected}")]
    AudienceMismatch {
        /// The audience the validator requires.
        expected: String,
    },

    /// The token expired before the current time (beyond skew tolerance).
    #[error("Token expired at {expired_at}")]
    TokenExpired {
        /// The token's expiry instant.
        expired_at: OffsetDateTime,
    },

    /// The token's not-before instant is in the future (beyond skew tolerance).
    #[error("Token not yet valid until {not_before}")]
    TokenNotYetValid {
        /// The token's not-before instant.
        not_before: OffsetDateTime,
    },

    /// The token's key id is not in the provider's key set, even after refresh.
    #[error("Unknown signing key: {kid}")]
    UnknownSigningKey {
        /// The key id the token declared.
        kid: String,
    },

    /// The provider's key set could not be fetched. Retryable.
    #[error("Signing keys unavailable: {message}")]
    KeyFetchUnavailable {
        /// Description of the fetch failure.
        message: String,
    },

    /// The callback `state` does not match the pending authorization state.
    #[error("Authorization state mismatch")]
    StateMismatch,

    /// The callback `state` was already consumed by an earlier callback.
    #[error("Authorization state already consumed")]
    ReplayedState,

    /// The ID token's nonce does not match the one issued at login start.
    #[error("Nonce mismatch: ID token nonce does not match the login request")]
    NonceMismatch,

    /// The provider rejected the authorization code as already used.
    #[error("Authorization code already redeemed")]
    AuthorizationCodeReused,

    /// The refresh token has expired; the user must re-authenticate.
    #[error("Refresh token expired")]
    RefreshTokenExpired,

    /// The provider rejected the refresh token; the user must re-authenticate.
    #[error("Refresh token rejected by provider")]
    RefreshTokenInvalid,

    /// Another refresh for the same session is already in flight.
    #[error("Refresh already in progress for this session")]
    RefreshInProgress,

    /// The validated token does not carry the required scope.
    #[error("Insufficient scope: required {required}")]
    InsufficientScope {
        /// The scope the resource requires.
        required: String,
    },

    /// The request carries no valid authentication at all.
    #[error("Unauthenticated: {message}")]
    Unauthenticated {
        /// Description of what was missing or invalid.
        message: String,
    },

    /// The token endpoint could not be reached. Retryable.
    #[error("Token endpoint unavailable: {message}")]
    TokenExchangeUnavailable {
        /// Description of the network failure.
        message: String,
    },

    /// The provider returned an OAuth error response.
    #[error("Provider error: {error} - {description}")]
    ProviderError {
        /// The OAuth error code.
        error: String,
        /// The provider's error description, if any.
        description: String,
    },

    /// The provider's discovery document could not be fetched. Retryable.
    #[error("Discovery unavailable: {message}")]
    DiscoveryUnavailable {
        /// Description of the fetch failure.
        message: String,
    },

    /// The relying-party configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `MalformedToken` error.
    #[must_use]
    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }

    /// Creates a new `IssuerMismatch` error.
    #[must_use]
    pub fn issuer_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::IssuerMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `AudienceMismatch` error.
    #[must_use]
    pub fn audience_mismatch(expected: impl Into<String>) -> Self {
        Self::AudienceMismatch {
            expected: expected.into(),
        }
    }

    /// Creates a new `UnknownSigningKey` error.
    #[must_use]
    pub fn unknown_signing_key(kid: impl Into<String>) -> Self {
        Self::UnknownSigningKey { kid: kid.into() }
    }

    /// Creates a new `KeyFetchUnavailable` error.
    #[must_use]
    pub fn key_fetch_unavailable(message: impl Into<String>) -> Self {
        Self::KeyFetchUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `InsufficientScope` error.
    #[must_use]
    pub fn insufficient_scope(required: impl Into<String>) -> Self {
        Self::InsufficientScope {
            required: required.into(),
        }
    }

    /// Creates a new `Unauthenticated` error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    /// Creates a new `TokenExchangeUnavailable` error.
    #[must_use]
    pub fn token_exchange_unavailable(message: impl Into<String>) -> Self {
        Self::TokenExchangeUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `ProviderError` from an OAuth error response.
    #[must_use]
    pub fn provider_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::ProviderError {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Creates a new `DiscoveryUnavailable` error.
    #[must_use]
    pub fn discovery_unavailable(message: impl Into<String>) -> Self {
        Self::DiscoveryUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a token validation failure.
    ///
    /// Validation failures are terminal for the presented token: retrying
    /// with the same token cannot succeed.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken { .. }
                | Self::InvalidSignature
                | Self::IssuerMismatch { .. }
                | Self::AudienceMismatch { .. }
                | Self::TokenExpired { .. }
                | Self::TokenNotYetValid { .. }
                | Self::UnknownSigningKey { .. }
        )
    }

    /// Returns `true` if this is a login-flow failure.
    ///
    /// Flow failures terminate the login attempt; the caller must restart
    /// from the login endpoint.
    #[must_use]
    pub fn is_flow_error(&self) -> bool {
        matches!(
            self,
            Self::StateMismatch
                | Self::ReplayedState
                | Self::NonceMismatch
                | Self::AuthorizationCodeReused
        )
    }

    /// Returns `true` if this failure is a network-layer failure that the
    /// caller may sensibly retry with backoff.
    ///
    /// Protocol and semantic failures are never retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::KeyFetchUnavailable { .. }
                | Self::TokenExchangeUnavailable { .. }
                | Self::DiscoveryUnavailable { .. }
        )
    }

    /// Returns `true` if the failure means the session holds no usable
    /// credentials and the user must re-authenticate.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::RefreshTokenExpired | Self::RefreshTokenInvalid | Self::Unauthenticated { .. }
        )
    }

    /// Returns the stable machine-readable kind for this error.
    ///
    /// Response bodies carry this instead of the display message, so
    /// clients can branch on it without string matching.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedToken { .. } => "malformed_token",
            Self::InvalidSignature => "invalid_signature",
            Self::IssuerMismatch { .. } => "issuer_mismatch",
            Self::AudienceMismatch { .. } => "audience_mismatch",
            Self::TokenExpired { .. } => "token_expired",
            Self::TokenNotYetValid { .. } => "token_not_yet_valid",
            Self::UnknownSigningKey { .. } => "unknown_signing_key",
            Self::KeyFetchUnavailable { .. } => "key_fetch_unavailable",
            Self::StateMismatch => "state_mismatch",
            Self::ReplayedState => "replayed_state",
            Self::NonceMismatch => "nonce_mismatch",
            Self::AuthorizationCodeReused => "authorization_code_reused",
            Self::RefreshTokenExpired => "refresh_token_expired",
            Self::RefreshTokenInvalid => "refresh_token_invalid",
            Self::RefreshInProgress => "refresh_in_progress",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::TokenExchangeUnavailable { .. } => "token_exchange_unavailable",
            Self::ProviderError { .. } => "provider_error",
            Self::DiscoveryUnavailable { .. } => "discovery_unavailable",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Type alias for relying-party results.
pub type AuthResult<T> = Result<T, AuthError>;
