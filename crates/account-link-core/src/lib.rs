//! account-link-core: protocol pieces shared by the authorization server and
//! the client application.
//!
//! - `pkce`: RFC 7636 challenge derivation and verification
//! - `token`: HS256 access tokens, rotating refresh grants, bearer verification
//! - `store`: pluggable key-value storage with typed tables
//! - `error`: RFC 6749 error taxonomy and JSON error bodies
//! - `guard`: uniform bearer-token check for protected resources
//! - `http`: redirect and CORS helpers shared by both services

pub mod crypto;
pub mod error;
pub mod guard;
pub mod http;
pub mod pkce;
pub mod store;
pub mod token;

// Re-export key types for convenience
pub use error::{ErrorResponse, OAuthError};
pub use guard::{authorize_bearer, Unauthorized};
pub use pkce::{ChallengeMethod, PkcePair};
pub use store::{KeyValueStore, MemoryStore, StoreError, Stored, Table};
pub use token::{
    expiry_after, Claims, IssuerConfig, Token, TokenError, TokenIssuer, TokenResponse, TokenVerifier,
    MAX_LIFETIME_SECS,
};

/// The only scope this deployment grants.
pub const DEFAULT_SCOPE: &str = "all";
