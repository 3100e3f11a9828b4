//! RFC 8414: OAuth 2.0 Authorization Server Metadata
//!
//! Provides the `/.well-known/oauth-authorization-server` endpoint that clients
//! use to discover OAuth endpoints and capabilities.

use std::sync::Arc;

use account_link_core::ChallengeMethod;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Metadata document; every URL is rooted at the public URL
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Matches the `iss` claim of issued access tokens
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    /// The single configured scope
    pub scopes_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

/// Handler for `GET /.well-known/oauth-authorization-server`
pub async fn handler(State(state): State<Arc<AppState>>) -> Json<AuthorizationServerMetadata> {
    let base_url = &state.public_url;

    let metadata = AuthorizationServerMetadata {
        issuer: state.issuer.issuer().to_string(),
        authorization_endpoint: format!("{}/oauth/authorize", base_url),
        token_endpoint: format!("{}/oauth/token", base_url),
        scopes_supported: vec![state.config.scope.clone()],
        response_types_supported: vec!["code".to_string()],
        grant_types_supported: vec![
            "authorization_code".to_string(),
            "password".to_string(),
            "refresh_token".to_string(),
        ],
        code_challenge_methods_supported: [ChallengeMethod::S256, ChallengeMethod::Plain]
            .iter()
            .map(|m| m.as_str().to_string())
            .collect(),
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".to_string(),
            "client_secret_post".to_string(),
        ],
    };

    tracing::debug!("Serving authorization server metadata");
    Json(metadata)
}
