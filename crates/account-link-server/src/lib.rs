//! OAuth2 authorization server for account linking
//!
//! Provides:
//! - Authorization code flow with PKCE (`/oauth/authorize`)
//! - Token exchange, password grant and refresh (`/oauth/token`)
//! - Session-backed login and consent pages (`/login`, `/auth`)
//! - RFC 8414 OAuth metadata discovery
//! - Bearer token validation for forward-auth proxies (`/validate`)

pub mod config;
pub mod credentials;
pub mod html;
pub mod identity;
pub mod login;
pub mod oauth;
pub mod session;
pub mod storage;
pub mod validation;

use std::sync::Arc;

use account_link_core::http::cors_layer;
use account_link_core::{IssuerConfig, KeyValueStore, MemoryStore, TokenIssuer, TokenVerifier};
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::credentials::{ClientRegistration, CredentialStore};
use crate::identity::{IdentityVerifier, StaticIdentityVerifier};
use crate::session::SessionStore;
use crate::storage::Storage;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub credentials: CredentialStore,
    pub storage: Storage,
    pub sessions: SessionStore,
    pub identity: Arc<dyn IdentityVerifier>,
    pub issuer: TokenIssuer,
    /// Accepts access tokens issued to the registered client
    pub verifier: TokenVerifier,
    /// Public base URL without trailing slash; also the token issuer
    pub public_url: String,
}

impl AppState {
    /// State backed by process memory and the configured user list
    pub fn new(config: Config, client: ClientRegistration, public_url: &str) -> anyhow::Result<Self> {
        let identity = Arc::new(StaticIdentityVerifier::new(config.users.clone()));
        Self::with_parts(config, client, public_url, Arc::new(MemoryStore::new()), identity)
    }

    pub fn with_parts(
        config: Config,
        client: ClientRegistration,
        public_url: &str,
        backend: Arc<dyn KeyValueStore>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> anyhow::Result<Self> {
        let public_url = public_url.trim_end_matches('/').to_string();
        url::Url::parse(&public_url).with_context(|| format!("Invalid public URL: {}", public_url))?;

        // Default to the client secret so the client can check bearer tokens itself
        let signing_secret = config
            .tokens
            .signing_secret
            .clone()
            .unwrap_or_else(|| client.client_secret.clone());

        let credentials = CredentialStore::new(client).context("Invalid client registration")?;
        let storage = Storage::new(backend);
        let sessions = SessionStore::new(storage.sessions(), &config.session);
        let issuer = TokenIssuer::new(
            signing_secret.as_bytes(),
            IssuerConfig {
                issuer: public_url.clone(),
                access_token_lifetime_secs: config.tokens.access_token_lifetime_secs,
                refresh_token_lifetime_secs: config.tokens.refresh_token_lifetime_secs,
            },
            storage.refresh_grants(),
        );
        let verifier = issuer.verifier(credentials.client_id());

        Ok(Self {
            config,
            credentials,
            storage,
            sessions,
            identity,
            issuer,
            verifier,
            public_url,
        })
    }

    /// Drop expired records and idle session locks
    pub async fn purge_expired(&self) -> anyhow::Result<usize> {
        let removed = self.storage.cleanup_expired().await?;
        let locks = self.sessions.prune_locks();
        if locks > 0 {
            tracing::debug!("Pruned {} idle session locks", locks);
        }
        Ok(removed)
    }
}

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // OAuth metadata (RFC 8414)
        .route(
            "/.well-known/oauth-authorization-server",
            get(oauth::metadata::handler),
        )
        // Authorization endpoint
        .route(
            "/oauth/authorize",
            get(oauth::authorize::get_handler).post(oauth::authorize::post_handler),
        )
        // Token endpoint
        .route("/oauth/token", post(oauth::token::handler))
        // Resource owner login and consent
        .route("/login", get(login::get_login).post(login::post_login))
        .route("/auth", get(login::get_auth))
        // Validation endpoint for forward-auth proxies
        .route("/validate", get(validation::handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;

    #[test]
    fn test_public_url_is_normalized() {
        let state = test_state();
        assert_eq!(state.public_url, "http://auth.test:9096");
        assert_eq!(state.issuer.issuer(), "http://auth.test:9096");
    }

    #[tokio::test]
    async fn test_tokens_verify_with_client_secret() {
        let state = test_state();
        let token = state.issuer.mint("test", CLIENT_ID, "all").await.unwrap();
        let verifier = account_link_core::TokenVerifier::new_hs256(
            CLIENT_SECRET.as_bytes(),
            "http://auth.test:9096",
            CLIENT_ID,
        );
        assert_eq!(verifier.verify(&token.access_token).unwrap().sub, "test");
    }

    #[tokio::test]
    async fn test_purge_expired_runs() {
        let state = test_state();
        assert_eq!(state.purge_expired().await.unwrap(), 0);
    }
}
