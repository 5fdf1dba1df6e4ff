//! Scope-based resource authorization.
//!
//! [`ScopeGate`] is the check that runs after token validation: does the
//! validated token's scope set contain the scope a resource requires?
//! Matching is exact and case-sensitive on the whitespace-split scope set;
//! there is no hierarchy and no wildcard.
//!
//! The gate is only reached with validated claims. A request that fails
//! validation never gets here and is reported as `Unauthenticated` (401),
//! keeping it distinguishable from the gate's `InsufficientScope` (403).

use crate::claims::Claims;
use crate::error::{AuthError, AuthResult};

/// Outcome of a scope authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The required scope is present; the request may proceed.
    Allow,
    /// The request is denied.
    Deny(DenyReason),
}

/// Why a scope check denied access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The token's scope set does not contain the required scope.
    InsufficientScope {
        /// The scope the resource requires.
        required: String,
    },
}

impl Decision {
    /// Returns `true` for `Allow`.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Converts the decision into a result, mapping a denial to
    /// `InsufficientScope`.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientScope` for `Deny`.
    pub fn into_result(self) -> AuthResult<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(DenyReason::InsufficientScope { required }) => {
                Err(AuthError::insufficient_scope(required))
            }
        }
    }
}

/// Gate protecting one resource with a required scope.
#[derive(Debug, Clone)]
pub struct ScopeGate {
    required_scope: String,
}

impl ScopeGate {
    /// Creates a gate requiring the given scope.
    #[must_use]
    pub fn new(required_scope: impl Into<String>) -> Self {
        Self {
            required_scope: required_scope.into(),
        }
    }

    /// Returns the scope this gate requires.
    #[must_use]
    pub fn required_scope(&self) -> &str {
        &self.required_scope
    }

    /// Checks validated claims against this gate's required scope.
    #[must_use]
    pub fn authorize(&self, claims: &Claims) -> Decision {
        check(claims, &self.required_scope)
    }
}

/// Checks validated claims against a required scope.
#[must_use]
pub fn check(claims: &Claims, required_scope: &str) -> Decision {
    if claims.has_scope(required_scope) {
        Decision::Allow
    } else {
        tracing::debug!(
            sub = %claims.sub,
            required = required_scope,
            "Scope check denied"
        );
        Decision::Deny(DenyReason::InsufficientScope {
            required: required_scope.to_string(),
        })
    }
}
