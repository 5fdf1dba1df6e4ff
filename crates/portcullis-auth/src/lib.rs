//! # portcullis-auth
//!
//! OIDC relying-party core for the Portcullis server.
//!
//! This crate implements the protocol logic a relying party has to get
//! right: resolving the provider's signing keys, validating bearer and ID
//! tokens, driving the authorization-code login flow, rotating refresh
//! tokens, and gating resources on scopes. The HTTP surface lives in
//! `portcullis-server`; this crate is routing-agnostic and exposes named
//! operations (`start_login`, `handle_callback`, `refresh`, `authorize`).
//!
//! ## Modules
//!
//! - [`provider`] - immutable provider configuration
//! - [`discovery`] - OIDC discovery document fetching and caching
//! - [`jwks`] - signing-key resolution with miss-triggered refresh
//! - [`claims`] - typed, validated token claims
//! - [`validator`] - signature/issuer/audience/lifetime validation
//! - [`pkce`] - RFC 7636 verifier and S256 challenge
//! - [`session`] - browser sessions and the in-memory store
//! - [`token`] - token sets and the token-endpoint client
//! - [`flow`] - the authorization-code flow state machine
//! - [`refresh`] - single-use refresh-token rotation
//! - [`scope`] - the scope authorization gate
//! - [`error`] - the error taxonomy shared by all of the above

pub mod claims;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod jwks;
pub mod pkce;
pub mod provider;
pub mod refresh;
pub mod scope;
pub mod session;
pub mod token;
pub mod validator;

pub use claims::Claims;
pub use discovery::{DiscoveryCache, DiscoveryCacheConfig, DiscoveryDocument};
pub use error::{AuthError, AuthResult};
pub use flow::{CallbackParams, FlowState, LoginFlow, LoginRedirect, flow_state};
pub use jwks::{KeyResolver, KeyResolverConfig, ResolvedKey};
pub use pkce::{PkceChallenge, PkceVerifier};
pub use provider::ProviderConfig;
pub use refresh::RefreshManager;
pub use scope::{Decision, DenyReason, ScopeGate};
pub use session::{AuthorizationState, Session, SessionStore};
pub use token::{TokenEndpointClient, TokenResponse, TokenSet};
pub use validator::{AudienceCheck, TokenValidator};
