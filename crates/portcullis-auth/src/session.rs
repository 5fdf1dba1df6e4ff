//! Browser sessions and the in-memory session store.
//!
//! A [`Session`] ties a user agent (via an opaque cookie value) to its
//! [`TokenSet`] and to the [`AuthorizationState`] of an in-flight login.
//! Sessions are created when a login starts, populated by the callback,
//! and destroyed on logout or TTL expiry.
//!
//! # Lifecycle
//!
//! 1. `/login` creates (or reuses) a session and stores an
//!    `AuthorizationState` in it
//! 2. The callback consumes the state (single-use) and stores the token set
//! 3. Refreshes replace the token set wholesale, serialized per session
//! 4. Logout (or expiry) removes the session
//!
//! # Security
//!
//! - Session ids and state values are 256-bit random, base64url-encoded
//! - AuthorizationState expires after a short TTL (default 10 minutes) and
//!   is marked consumed on first use; a second callback with the same state
//!   is detected as a replay

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

use crate::error::{AuthError, AuthResult};
use crate::pkce::PkceVerifier;
use crate::token::TokenSet;

/// Generates a 256-bit random value encoded as base64url (43 characters).
///
/// Used for session ids, state values, and nonces; well above the OAuth 2.0
/// recommendation of 128 bits of entropy.
#[must_use]
pub fn generate_opaque_value() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Per-login-attempt state binding the callback to the session that
/// started the flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationState {
    /// Opaque random state value echoed back by the provider.
    pub state: String,

    /// OIDC nonce, checked against the ID token's nonce claim.
    pub nonce: String,

    /// PKCE verifier presented at code exchange.
    pub pkce_verifier: PkceVerifier,

    /// When this login attempt was started.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When this login attempt stops being accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// When the state was consumed by a callback. States are single-use.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub consumed_at: Option<OffsetDateTime>,
}

impl AuthorizationState {
    /// Default lifetime of a login attempt.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

    /// Creates a fresh authorization state with random state and nonce.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            state: generate_opaque_value(),
            nonce: generate_opaque_value(),
            pkce_verifier: PkceVerifier::generate(),
            created_at: now,
            expires_at: now + ttl,
            consumed_at: None,
        }
    }

    /// Returns `true` if the login attempt has timed out.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    /// Returns `true` if a callback already consumed this state.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}

/// A browser session: the association between a user agent and its tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque session identifier carried in the cookie.
    pub id: String,

    /// Pending login attempt, if one is in flight (or recently consumed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_auth: Option<AuthorizationState>,

    /// The credential bundle, once the flow reached Authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenSet>,

    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the session expires regardless of activity.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl Session {
    /// Returns `true` if the session holds a token set.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    /// Returns `true` if the session itself has expired.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

struct SessionEntry {
    session: Session,
    /// Serializes refresh attempts for this session. The manager takes the
    /// lock with `try_lock`; a losing concurrent caller gets
    /// `RefreshInProgress` instead of racing the provider.
    refresh_lock: Arc<Mutex<()>>,
}

/// In-memory session store keyed by opaque session id.
///
/// Reads and writes go through an async `RwLock`; per-session token
/// mutation is additionally serialized by the entry's refresh lock.
/// Cross-session operations are fully independent.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    session_ttl: Duration,
    state_ttl: Duration,
}

impl SessionStore {
    /// Default session lifetime.
    pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(8 * 3600);

    /// Creates a store with the default TTLs.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttls(Self::DEFAULT_SESSION_TTL, AuthorizationState::DEFAULT_TTL)
    }

    /// Creates a store with explicit session and login-attempt TTLs.
    #[must_use]
    pub fn with_ttls(session_ttl: Duration, state_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            session_ttl,
            state_ttl,
        }
    }

    /// Creates a new session and returns a snapshot of it.
    pub async fn create(&self) -> Session {
        let now = OffsetDateTime::now_utc();
        let session = Session {
            id: generate_opaque_value(),
            pending_auth: None,
            tokens: None,
            created_at: now,
            expires_at: now + self.session_ttl,
        };

        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session.id.clone(),
            SessionEntry {
                session: session.clone(),
                refresh_lock: Arc::new(Mutex::new(())),
            },
        );

        tracing::debug!(session_id = %session.id, "Session created");
        session
    }

    /// Returns a snapshot of a live session, removing it if expired.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let now = OffsetDateTime::now_utc();

        {
            let sessions = self.sessions.read().await;
            match sessions.get(session_id) {
                Some(entry) if !entry.session.is_expired(now) => {
                    return Some(entry.session.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it so the id cannot be revived.
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(session_id)
            .is_some_and(|e| e.session.is_expired(now))
        {
            sessions.remove(session_id);
            tracing::debug!(session_id, "Expired session removed");
        }
        None
    }

    /// Starts a login attempt: stores a fresh `AuthorizationState` in the
    /// session, replacing any previous attempt.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` when the session does not exist.
    pub async fn begin_login(&self, session_id: &str) -> AuthResult<AuthorizationState> {
        let auth_state = AuthorizationState::new(self.state_ttl);

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| AuthError::unauthenticated("unknown session"))?;

        entry.session.pending_auth = Some(auth_state.clone());
        Ok(auth_state)
    }

    /// Matches and consumes the pending authorization state for a callback.
    ///
    /// The state must match exactly, must not have been consumed before,
    /// and must not have timed out. On success the state is marked consumed
    /// (single-use) and returned so the caller can check the nonce and
    /// present the PKCE verifier.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` - no such session.
    /// - `StateMismatch` - no pending attempt, a different state value, or
    ///   an attempt that timed out.
    /// - `ReplayedState` - the state matched but was already consumed.
    pub async fn consume_auth_state(
        &self,
        session_id: &str,
        state: &str,
    ) -> AuthResult<AuthorizationState> {
        let now = OffsetDateTime::now_utc();

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| AuthError::unauthenticated("unknown session"))?;

        let pending = entry
            .session
            .pending_auth
            .as_mut()
            .ok_or(AuthError::StateMismatch)?;

        if pending.state != state {
            return Err(AuthError::StateMismatch);
        }
        if pending.is_consumed() {
            tracing::warn!(session_id, "Replayed authorization state rejected");
            return Err(AuthError::ReplayedState);
        }
        if pending.is_expired(now) {
            return Err(AuthError::StateMismatch);
        }

        pending.consumed_at = Some(now);
        Ok(pending.clone())
    }

    /// Stores a token set, transitioning the session to Authenticated.
    ///
    /// The set replaces any previous one wholesale; the old refresh token
    /// is gone the moment this returns.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` when the session does not exist.
    pub async fn store_tokens(&self, session_id: &str, tokens: TokenSet) -> AuthResult<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| AuthError::unauthenticated("unknown session"))?;

        entry.session.tokens = Some(tokens);
        Ok(())
    }

    /// Drops the session's token set, transitioning it to unauthenticated.
    pub async fn clear_tokens(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.session.tokens = None;
        }
    }

    /// Returns the refresh serialization lock for a session.
    pub async fn refresh_lock(&self, session_id: &str) -> Option<Arc<Mutex<()>>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|e| e.refresh_lock.clone())
    }

    /// Removes a session, returning its last snapshot (for `id_token_hint`).
    pub async fn destroy(&self, session_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(session_id).map(|e| e.session);
        if removed.is_some() {
            tracing::debug!(session_id, "Session destroyed");
        }
        removed
    }

    /// Removes all expired sessions.
    pub async fn purge_expired(&self) {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, e| !e.session.is_expired(now));
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, "Purged expired sessions");
        }
    }

    /// Returns the number of live entries.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_token_set() -> TokenSet {
        TokenSet {
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            id_token: "idt-1".to_string(),
            expires_at: OffsetDateTime::now_utc() + Duration::from_secs(300),
            refresh_expires_at: None,
        }
    }

    #[test]
    fn test_opaque_value_shape() {
        let value = generate_opaque_value();
        assert_eq!(value.len(), 43);
        assert!(
            value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(value, generate_opaque_value());
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SessionStore::new();
        let session = store.create().await;

        let fetched = store.get(&session.id).await.unwrap();
        assert_eq!(fetched.id, session.id);
        assert!(!fetched.is_authenticated());

        assert!(store.get("no-such-session").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_removed_on_access() {
        let store = SessionStore::with_ttls(Duration::ZERO, AuthorizationState::DEFAULT_TTL);
        let session = store.create().await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get(&session.id).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_state_single_use() {
        let store = SessionStore::new();
        let session = store.create().await;
        let auth_state = store.begin_login(&session.id).await.unwrap();

        // First callback wins.
        let consumed = store
            .consume_auth_state(&session.id, &auth_state.state)
            .await
            .unwrap();
        assert_eq!(consumed.nonce, auth_state.nonce);

        // Replay of the same state is detected as such.
        let err = store
            .consume_auth_state(&session.id, &auth_state.state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ReplayedState));
    }

    #[tokio::test]
    async fn test_state_mismatch() {
        let store = SessionStore::new();
        let session = store.create().await;
        store.begin_login(&session.id).await.unwrap();

        let err = store
            .consume_auth_state(&session.id, "some-other-state")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));

        // No pending attempt at all is also a mismatch.
        let other = store.create().await;
        let err = store
            .consume_auth_state(&other.id, "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
    }

    #[tokio::test]
    async fn test_state_ttl_enforced() {
        let store = SessionStore::with_ttls(SessionStore::DEFAULT_SESSION_TTL, Duration::ZERO);
        let session = store.create().await;
        let auth_state = store.begin_login(&session.id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = store
            .consume_auth_state(&session.id, &auth_state.state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
    }

    #[tokio::test]
    async fn test_new_login_replaces_pending_state() {
        let store = SessionStore::new();
        let session = store.create().await;

        let first = store.begin_login(&session.id).await.unwrap();
        let second = store.begin_login(&session.id).await.unwrap();
        assert_ne!(first.state, second.state);

        // The superseded state no longer matches.
        let err = store
            .consume_auth_state(&session.id, &first.state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));

        store
            .consume_auth_state(&session.id, &second.state)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_token_storage_round_trip() {
        let store = SessionStore::new();
        let session = store.create().await;

        store
            .store_tokens(&session.id, test_token_set())
            .await
            .unwrap();
        let fetched = store.get(&session.id).await.unwrap();
        assert!(fetched.is_authenticated());
        assert_eq!(fetched.tokens.unwrap().access_token, "at-1");

        store.clear_tokens(&session.id).await;
        let fetched = store.get(&session.id).await.unwrap();
        assert!(!fetched.is_authenticated());
    }

    #[tokio::test]
    async fn test_destroy_returns_last_snapshot() {
        let store = SessionStore::new();
        let session = store.create().await;
        store
            .store_tokens(&session.id, test_token_set())
            .await
            .unwrap();

        let removed = store.destroy(&session.id).await.unwrap();
        assert_eq!(removed.tokens.unwrap().id_token, "idt-1");
        assert!(store.get(&session.id).await.is_none());
        assert!(store.destroy(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_lock_serializes() {
        let store = SessionStore::new();
        let session = store.create().await;

        let lock = store.refresh_lock(&session.id).await.unwrap();
        let guard = lock.clone().try_lock_owned().unwrap();

        // While held, a second taker fails immediately.
        assert!(lock.clone().try_lock_owned().is_err());
        drop(guard);
        assert!(lock.try_lock_owned().is_ok());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = SessionStore::with_ttls(Duration::ZERO, AuthorizationState::DEFAULT_TTL);
        store.create().await;
        store.create().await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.purge_expired().await;
        assert!(store.is_empty().await);
    }
}
