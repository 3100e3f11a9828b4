//! OAuth 2.0 Token Endpoint
//!
//! Handles:
//! - Authorization code exchange (with PKCE verification)
//! - Resource owner password credentials
//! - Refresh token grants (rotating)
//!
//! The client authenticates with HTTP Basic or with `client_id` /
//! `client_secret` form fields.

use std::sync::Arc;

use account_link_core::crypto::constant_time_eq;
use account_link_core::{pkce, OAuthError, Token};
use axum::{
    extract::{rejection::FormRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::Deserialize;

use crate::credentials::ClientRegistration;
use crate::AppState;

/// Token request (form-encoded)
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    /// "authorization_code", "password" or "refresh_token"
    #[serde(default)]
    pub grant_type: Option<String>,

    /// Authorization code (for authorization_code grant)
    #[serde(default)]
    pub code: Option<String>,

    /// Redirect URI (for authorization_code grant, must match original if sent)
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// PKCE code verifier (for authorization_code grant)
    #[serde(default)]
    pub code_verifier: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    /// Refresh token (for refresh_token grant)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Resource owner credentials (for password grant)
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,
}

/// Handler for `POST /oauth/token`
pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let request = match form {
        Ok(Form(request)) => request,
        Err(rejection) => {
            return OAuthError::InvalidRequest(rejection.body_text()).into_response();
        }
    };

    match handle(&state, &headers, &request).await {
        Ok(token) => (
            StatusCode::OK,
            [
                (header::CACHE_CONTROL, "no-store"),
                (header::PRAGMA, "no-cache"),
            ],
            Json(token.to_response()),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle(state: &AppState, headers: &HeaderMap, request: &TokenRequest) -> Result<Token, OAuthError> {
    let (client_id, client_secret) = client_credentials(headers, request)?;
    let client = state.credentials.authenticate(&client_id, &client_secret)?;

    match request.grant_type.as_deref() {
        Some("authorization_code") => handle_authorization_code(state, client, request).await,
        Some("password") => handle_password(state, client, request).await,
        Some("refresh_token") => handle_refresh_token(state, client, request).await,
        Some(other) => Err(OAuthError::UnsupportedGrantType(format!(
            "Grant type '{}' is not supported",
            other
        ))),
        None => Err(OAuthError::InvalidRequest("grant_type is required".to_string())),
    }
}

/// Read client credentials from the Basic header, falling back to form fields.
fn client_credentials(headers: &HeaderMap, request: &TokenRequest) -> Result<(String, String), OAuthError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let (id, secret) = parse_basic(value.to_str().ok()).ok_or_else(|| {
            OAuthError::InvalidClient("Malformed Basic authorization header".to_string())
        })?;
        if request.client_secret.is_some() {
            return Err(OAuthError::InvalidRequest(
                "Use only one client authentication method".to_string(),
            ));
        }
        if request.client_id.as_deref().is_some_and(|form_id| form_id != id) {
            return Err(OAuthError::InvalidClient("client_id does not match".to_string()));
        }
        return Ok((id, secret));
    }

    match (&request.client_id, &request.client_secret) {
        (Some(id), Some(secret)) => Ok((id.clone(), secret.clone())),
        _ => Err(OAuthError::InvalidClient("Client authentication required".to_string())),
    }
}

fn parse_basic(value: Option<&str>) -> Option<(String, String)> {
    let (scheme, encoded) = value?.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, OAuthError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest(format!("{} is required", name)))
}

fn check_scope(state: &AppState, requested: Option<&str>) -> Result<(), OAuthError> {
    match requested {
        Some(s) if s != state.config.scope => {
            Err(OAuthError::InvalidScope(format!("Scope '{}' is not available", s)))
        }
        _ => Ok(()),
    }
}

/// Handle authorization_code grant
async fn handle_authorization_code(
    state: &AppState,
    client: &ClientRegistration,
    request: &TokenRequest,
) -> Result<Token, OAuthError> {
    let code = required(&request.code, "code")?;
    let code_verifier = required(&request.code_verifier, "code_verifier")?;

    let invalid_code = || OAuthError::InvalidGrant("Authorization code is invalid or expired".to_string());

    let stored = state
        .storage
        .fetch_auth_code(code)
        .await?
        .ok_or_else(invalid_code)?;
    let auth_code = &stored.value;

    if auth_code.expires_at <= Utc::now() {
        state.storage.discard_auth_code(code).await?;
        return Err(invalid_code());
    }

    // Verify client_id matches
    if !constant_time_eq(&auth_code.client_id, &client.client_id) {
        return Err(OAuthError::InvalidGrant(
            "Authorization code was issued to another client".to_string(),
        ));
    }

    // Verify redirect_uri matches
    if let Some(redirect_uri) = &request.redirect_uri {
        if *redirect_uri != auth_code.redirect_uri {
            return Err(OAuthError::InvalidGrant("redirect_uri does not match".to_string()));
        }
    }

    // Verify PKCE code_verifier. A wrong verifier burns the code.
    if !pkce::verify(
        &auth_code.code_challenge,
        auth_code.code_challenge_method,
        code_verifier,
    ) {
        state.storage.discard_auth_code(code).await?;
        return Err(OAuthError::InvalidGrant(
            "code_verifier does not match code_challenge".to_string(),
        ));
    }

    if !state.storage.consume_auth_code(code, &stored).await? {
        return Err(invalid_code());
    }

    let token = state
        .issuer
        .mint(&auth_code.user_id, &auth_code.client_id, &auth_code.scope)
        .await?;

    tracing::info!("Issued access token for client {}", client.client_id);
    Ok(token)
}

/// Handle password grant
async fn handle_password(
    state: &AppState,
    client: &ClientRegistration,
    request: &TokenRequest,
) -> Result<Token, OAuthError> {
    let username = required(&request.username, "username")?;
    let password = required(&request.password, "password")?;
    check_scope(state, request.scope.as_deref())?;

    let user_id = state
        .identity
        .verify(username, password)
        .await
        .map_err(|e| OAuthError::ServerError(e.to_string()))?
        .ok_or_else(|| OAuthError::InvalidGrant("Invalid resource owner credentials".to_string()))?;

    let token = state
        .issuer
        .mint(&user_id, &client.client_id, &state.config.scope)
        .await?;

    tracing::info!(
        "Issued access token for client {} via password grant",
        client.client_id
    );
    Ok(token)
}

/// Handle refresh_token grant
async fn handle_refresh_token(
    state: &AppState,
    client: &ClientRegistration,
    request: &TokenRequest,
) -> Result<Token, OAuthError> {
    let refresh_token = required(&request.refresh_token, "refresh_token")?;
    check_scope(state, request.scope.as_deref())?;

    let token = state.issuer.refresh(refresh_token, &client.client_id).await?;

    tracing::info!("Refreshed access token for client {}", client.client_id);
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic(id: &str, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", STANDARD.encode(format!("{}:{}", id, secret)));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[test]
    fn test_basic_credentials() {
        let (id, secret) = client_credentials(&basic("client", "s:e:c"), &TokenRequest::default()).unwrap();
        assert_eq!(id, "client");
        // only the first colon separates
        assert_eq!(secret, "s:e:c");
    }

    #[test]
    fn test_form_credentials() {
        let request = TokenRequest {
            client_id: Some("client".into()),
            client_secret: Some("secret".into()),
            ..Default::default()
        };
        let (id, secret) = client_credentials(&HeaderMap::new(), &request).unwrap();
        assert_eq!((id.as_str(), secret.as_str()), ("client", "secret"));
    }

    #[test]
    fn test_missing_or_malformed_credentials() {
        let err = client_credentials(&HeaderMap::new(), &TokenRequest::default()).unwrap_err();
        assert_eq!(err.code(), "invalid_client");

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        let err = client_credentials(&headers, &TokenRequest::default()).unwrap_err();
        assert_eq!(err.code(), "invalid_client");

        let request = TokenRequest {
            client_secret: Some("secret".into()),
            ..Default::default()
        };
        let err = client_credentials(&basic("client", "secret"), &request).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_required_rejects_empty() {
        assert!(required(&Some(String::new()), "code").is_err());
        assert!(required(&None, "code").is_err());
        assert_eq!(required(&Some("x".into()), "code").unwrap(), "x");
    }
}
