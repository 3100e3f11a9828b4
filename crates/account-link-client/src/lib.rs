//! Client application for account linking
//!
//! Provides:
//! - `GET /` starts an authorization code + PKCE flow for a downstream consumer
//! - `GET /oauth2` takes the callback, redeems the code and hands the access
//!   token to the consumer in the redirect fragment
//! - `GET /refresh` refreshes the linked token
//! - `GET /listar-itens` serves a resource protected by the access token

pub mod config;
pub mod error;
pub mod exchange;
pub mod flow;
pub mod handlers;
pub mod resource;

use std::sync::Arc;

use account_link_core::http::cors_layer;
use account_link_core::{KeyValueStore, MemoryStore, TokenVerifier};
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::config::{ClientSettings, Config};
use crate::exchange::TokenClient;
use crate::flow::FlowStore;

/// Shared application state
pub struct ClientState {
    pub config: Config,
    pub settings: ClientSettings,
    pub flows: FlowStore,
    pub tokens: TokenClient,
    pub verifier: TokenVerifier,
    pub authorize_endpoint: Url,
    backend: Arc<dyn KeyValueStore>,
}

impl ClientState {
    pub fn new(config: Config, settings: ClientSettings) -> anyhow::Result<Self> {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let issuer = settings.auth_server_url.trim_end_matches('/');
        let authorize_endpoint = Url::parse(&format!("{}/", issuer))?.join("oauth/authorize")?;
        Url::parse(&settings.redirect_url)?;

        if config.allowed_downstream_origins.is_empty() {
            tracing::warn!(
                "allowed_downstream_origins is empty: access tokens may be delivered to any http(s) redirect_uri"
            );
        }

        let secret = config
            .verification_secret
            .clone()
            .unwrap_or_else(|| settings.client_secret.clone());
        let verifier = TokenVerifier::new_hs256(secret.as_bytes(), issuer, &settings.client_id);

        Ok(Self {
            flows: FlowStore::new(backend.clone(), &config),
            tokens: TokenClient::new(&settings)?,
            verifier,
            authorize_endpoint,
            backend,
            config,
            settings,
        })
    }

    /// Drop expired flows and cached tokens
    pub async fn purge_expired(&self) -> anyhow::Result<usize> {
        let removed = self.backend.purge_expired().await?;
        if removed > 0 {
            tracing::info!("Cleaned up {} expired records", removed);
        }
        Ok(removed)
    }
}

/// Build the HTTP router
pub fn router(state: Arc<ClientState>) -> Router {
    Router::new()
        .route("/", get(handlers::begin_flow))
        .route("/oauth2", get(handlers::handle_callback))
        .route("/refresh", get(handlers::refresh_token))
        .route("/listar-itens", get(resource::list_items))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}
