//! # portcullis-server
//!
//! HTTP surface for the Portcullis OIDC relying party.
//!
//! The protocol logic lives in `portcullis-auth`; this crate wires it to an
//! axum application: configuration loading, tracing setup, the route set,
//! the bearer-token extractor, and the error-to-status mapping.

pub mod config;
pub mod error;
pub mod extract;
pub mod observability;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{AppConfig, ConfigError, load_config, resolve_config_path};
pub use error::ApiError;
pub use extract::{BearerClaims, SESSION_COOKIE, SessionCookie};
pub use routes::router;
pub use state::AppState;
