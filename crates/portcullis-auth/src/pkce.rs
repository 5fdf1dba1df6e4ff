//! PKCE (Proof Key for Code Exchange), RFC 7636, S256 only.
//!
//! This is the relying-party side of PKCE: generate a verifier at login
//! start, send its S256 challenge in the authorization request, and present
//! the verifier at code exchange. The "plain" method is never used.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// PKCE code verifier.
///
/// A high-entropy random string of URL-safe unreserved characters,
/// 43-128 characters long (RFC 7636 §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Generates a cryptographically random verifier.
    ///
    /// 32 random bytes encoded as base64url yield 43 characters, the
    /// minimum (and most common) verifier length.
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        // `gen` is a reserved keyword in Rust 2024, so we use r#gen
        let bytes: [u8; 32] = rng.r#gen();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Returns the verifier string sent to the token endpoint.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// PKCE code challenge: the base64url-encoded SHA-256 of the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Derives the S256 challenge from a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let digest = Sha256::digest(verifier.as_str().as_bytes());
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Returns the challenge string sent in the authorization request.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The challenge method parameter value. Always `S256`.
    #[must_use]
    pub const fn method() -> &'static str {
        "S256"
    }
}
