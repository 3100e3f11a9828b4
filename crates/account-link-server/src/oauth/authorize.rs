//! OAuth 2.0 Authorization Endpoint
//!
//! Handles authorization requests with PKCE support. A request arriving
//! without a logged-in session is parked in the session and the browser is
//! sent to `/login`; the consent page later posts back here with no
//! parameters, which resumes the parked request.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use account_link_core::crypto::generate_random_string;
use account_link_core::http::found;
use account_link_core::{expiry_after, pkce, ChallengeMethod, OAuthError};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::session::{Session, SessionError, LOGGED_IN_USER_ID, RETURN_REQUEST};
use crate::storage::AuthorizationCode;
use crate::AppState;

/// Raw authorization request parameters, as received
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeParams {
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Client state (passed through to redirect)
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl AuthorizeParams {
    pub fn is_empty(&self) -> bool {
        self == &AuthorizeParams::default()
    }

    /// Fill in fields from a form-encoded body. Body values win.
    pub fn merge_form(&mut self, body: &[u8]) {
        for (key, value) in url::form_urlencoded::parse(body) {
            let slot = match key.as_ref() {
                "response_type" => &mut self.response_type,
                "client_id" => &mut self.client_id,
                "redirect_uri" => &mut self.redirect_uri,
                "state" => &mut self.state,
                "code_challenge" => &mut self.code_challenge,
                "code_challenge_method" => &mut self.code_challenge_method,
                "scope" => &mut self.scope,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
    }
}

/// A validated authorization request
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: Option<String>,
    pub code_challenge: String,
    pub code_challenge_method: ChallengeMethod,
    pub scope: String,
}

#[derive(Debug)]
pub enum AuthorizeError {
    /// The redirect_uri cannot be trusted; answer the browser directly.
    Direct(OAuthError),
    /// Report the error to the client through its redirect_uri.
    Redirect {
        redirect_uri: String,
        error: OAuthError,
        state: Option<String>,
    },
}

impl From<OAuthError> for AuthorizeError {
    fn from(e: OAuthError) -> Self {
        AuthorizeError::Direct(e)
    }
}

impl From<SessionError> for AuthorizeError {
    fn from(e: SessionError) -> Self {
        AuthorizeError::Direct(OAuthError::ServerError(e.to_string()))
    }
}

impl From<account_link_core::StoreError> for AuthorizeError {
    fn from(e: account_link_core::StoreError) -> Self {
        AuthorizeError::Direct(e.into())
    }
}

impl IntoResponse for AuthorizeError {
    fn into_response(self) -> Response {
        match self {
            AuthorizeError::Direct(e) => e.into_response(),
            AuthorizeError::Redirect {
                redirect_uri,
                error,
                state,
            } => {
                tracing::warn!("Authorization request rejected: {}", error);
                let Ok(mut url) = Url::parse(&redirect_uri) else {
                    return error.into_response();
                };
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("error", error.code());
                    query.append_pair("error_description", error.description());
                    if let Some(s) = &state {
                        query.append_pair("state", s);
                    }
                }
                found(url.as_str())
            }
        }
    }
}

/// Handler for `GET /oauth/authorize`
pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    authorize(&state, &headers, params).await
}

/// Handler for `POST /oauth/authorize` - consent form submissions and form-encoded requests
pub async fn post_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(mut params): Query<AuthorizeParams>,
    body: Bytes,
) -> Response {
    params.merge_form(&body);
    authorize(&state, &headers, params).await
}

async fn authorize(state: &AppState, headers: &HeaderMap, inbound: AuthorizeParams) -> Response {
    let mut session = match state.sessions.start(headers).await {
        Ok(s) => s,
        Err(e) => return AuthorizeError::from(e).into_response(),
    };

    let outcome = process(state, &mut session, inbound).await;
    // Persist consumed session fields even when the request was rejected
    if let Err(e) = session.save().await {
        return AuthorizeError::from(e).into_response();
    }

    let mut response = match outcome {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    session.apply_cookie(&mut response);
    response
}

async fn process(
    state: &AppState,
    session: &mut Session<'_>,
    inbound: AuthorizeParams,
) -> Result<Response, AuthorizeError> {
    let params = if inbound.is_empty() {
        session.take::<AuthorizeParams>(RETURN_REQUEST)?.ok_or_else(|| {
            OAuthError::InvalidRequest("No authorization request in progress".to_string())
        })?
    } else {
        // A fresh request replaces whatever was parked before
        session.delete(RETURN_REQUEST);
        inbound
    };

    let request = validate_authorize_request(state, &params)?;

    let Some(user_id) = session.take::<String>(LOGGED_IN_USER_ID)? else {
        session.set(RETURN_REQUEST, &params)?;
        tracing::debug!("No authenticated user, redirecting to login");
        return Ok(found("/login"));
    };
    // The identity claim must be gone before a code exists
    session.save().await?;

    let code = issue_code(state, &request, &user_id).await?;

    let mut redirect = Url::parse(&request.redirect_uri)
        .map_err(|e| OAuthError::ServerError(format!("validated redirect_uri failed to parse: {}", e)))?;
    {
        let mut query = redirect.query_pairs_mut();
        query.append_pair("code", &code);
        if let Some(s) = &request.state {
            query.append_pair("state", s);
        }
    }
    Ok(found(redirect.as_str()))
}

async fn issue_code(
    state: &AppState,
    request: &AuthorizationRequest,
    user_id: &str,
) -> Result<String, AuthorizeError> {
    let code = generate_random_string(32);
    let now = Utc::now();
    let lifetime = state.config.codes.code_lifetime_secs;
    let expires_at = expiry_after(now, lifetime).ok_or_else(|| {
        OAuthError::ServerError(format!("code lifetime of {} seconds is out of range", lifetime))
    })?;

    let record = AuthorizationCode {
        client_id: request.client_id.clone(),
        user_id: user_id.to_string(),
        redirect_uri: request.redirect_uri.clone(),
        code_challenge: request.code_challenge.clone(),
        code_challenge_method: request.code_challenge_method,
        scope: request.scope.clone(),
        expires_at,
        created_at: now,
    };
    state
        .storage
        .store_auth_code(&code, &record, StdDuration::from_secs(lifetime))
        .await?;

    tracing::info!(
        "Issued authorization code for client {} (user {})",
        request.client_id,
        user_id
    );
    Ok(code)
}

/// Validate an authorization request.
///
/// Client and redirect_uri problems are answered directly; everything after
/// that is reported through the redirect_uri.
pub fn validate_authorize_request(
    state: &AppState,
    params: &AuthorizeParams,
) -> Result<AuthorizationRequest, AuthorizeError> {
    let client_id = match params.client_id.as_deref() {
        Some(id) => state
            .credentials
            .get_client(id)
            .ok_or_else(|| OAuthError::InvalidRequest("Unknown client_id".to_string()))?
            .client_id
            .clone(),
        None => state.credentials.client_id().to_string(),
    };

    let redirect_uri = params
        .redirect_uri
        .clone()
        .ok_or_else(|| OAuthError::InvalidRequest("redirect_uri is required".to_string()))?;
    if !state.credentials.is_redirect_allowed(&redirect_uri) {
        return Err(OAuthError::InvalidRequest(
            "redirect_uri is not registered for this client".to_string(),
        )
        .into());
    }

    let reject = |error: OAuthError| AuthorizeError::Redirect {
        redirect_uri: redirect_uri.clone(),
        error,
        state: params.state.clone(),
    };

    match params.response_type.as_deref() {
        Some("code") => {}
        Some(_) => {
            return Err(reject(OAuthError::UnsupportedResponseType(
                "Only response_type=code is supported".to_string(),
            )))
        }
        None => {
            return Err(reject(OAuthError::InvalidRequest(
                "response_type is required".to_string(),
            )))
        }
    }

    let code_challenge = match params.code_challenge.as_deref() {
        Some(c) if pkce::is_well_formed(c) => c.to_string(),
        Some(_) => {
            return Err(reject(OAuthError::InvalidRequest(
                "code_challenge must be 43 to 128 unreserved characters".to_string(),
            )))
        }
        None => {
            return Err(reject(OAuthError::InvalidRequest(
                "code_challenge is required".to_string(),
            )))
        }
    };

    let code_challenge_method = match params.code_challenge_method.as_deref() {
        None => ChallengeMethod::Plain,
        Some(m) => m
            .parse::<ChallengeMethod>()
            .map_err(|e| reject(OAuthError::InvalidRequest(e.to_string())))?,
    };

    let scope = match params.scope.as_deref() {
        None => state.config.scope.clone(),
        Some(s) if s == state.config.scope => s.to_string(),
        Some(s) => {
            return Err(reject(OAuthError::InvalidScope(format!(
                "Scope '{}' is not available",
                s
            ))))
        }
    };

    Ok(AuthorizationRequest {
        client_id,
        redirect_uri,
        state: params.state.clone(),
        code_challenge,
        code_challenge_method,
        scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    fn params() -> AuthorizeParams {
        AuthorizeParams {
            response_type: Some("code".into()),
            client_id: Some("client".into()),
            redirect_uri: Some("http://client.test:9094/oauth2".into()),
            state: Some("xyz".into()),
            code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into()),
            code_challenge_method: Some("S256".into()),
            scope: Some("all".into()),
        }
    }

    fn redirect_error(result: Result<AuthorizationRequest, AuthorizeError>) -> &'static str {
        match result {
            Err(AuthorizeError::Redirect { error, .. }) => error.code(),
            other => panic!("expected redirect error, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_form_overrides_query() {
        let mut p = AuthorizeParams {
            state: Some("from-query".into()),
            ..Default::default()
        };
        p.merge_form(b"state=from+body&redirect_uri=http%3A%2F%2Fx%2Fcb&unknown=1");
        assert_eq!(p.state.as_deref(), Some("from body"));
        assert_eq!(p.redirect_uri.as_deref(), Some("http://x/cb"));

        let mut empty = AuthorizeParams::default();
        empty.merge_form(b"");
        assert!(empty.is_empty());
    }

    #[test]
    fn test_valid_request() {
        let state = test_state();
        let request = validate_authorize_request(&state, &params()).unwrap();
        assert_eq!(request.client_id, "client");
        assert_eq!(request.code_challenge_method, ChallengeMethod::S256);
        assert_eq!(request.scope, "all");
    }

    #[test]
    fn test_defaults() {
        let state = test_state();
        let mut p = params();
        p.client_id = None;
        p.code_challenge_method = None;
        p.scope = None;
        let request = validate_authorize_request(&state, &p).unwrap();
        assert_eq!(request.client_id, "client");
        assert_eq!(request.code_challenge_method, ChallengeMethod::Plain);
        assert_eq!(request.scope, "all");
    }

    #[test]
    fn test_bad_client_or_redirect_never_redirects() {
        let state = test_state();

        let mut p = params();
        p.client_id = Some("someone-else".into());
        assert!(matches!(
            validate_authorize_request(&state, &p),
            Err(AuthorizeError::Direct(OAuthError::InvalidRequest(_)))
        ));

        let mut p = params();
        p.redirect_uri = Some("http://evil.test/oauth2".into());
        assert!(matches!(
            validate_authorize_request(&state, &p),
            Err(AuthorizeError::Direct(_))
        ));

        let mut p = params();
        p.redirect_uri = None;
        assert!(matches!(
            validate_authorize_request(&state, &p),
            Err(AuthorizeError::Direct(_))
        ));
    }

    #[test]
    fn test_errors_after_redirect_check_are_redirected() {
        let state = test_state();

        let mut p = params();
        p.response_type = Some("token".into());
        assert_eq!(
            redirect_error(validate_authorize_request(&state, &p)),
            "unsupported_response_type"
        );

        let mut p = params();
        p.code_challenge = None;
        assert_eq!(redirect_error(validate_authorize_request(&state, &p)), "invalid_request");

        let mut p = params();
        p.code_challenge = Some("short".into());
        assert_eq!(redirect_error(validate_authorize_request(&state, &p)), "invalid_request");

        let mut p = params();
        p.code_challenge_method = Some("S512".into());
        assert_eq!(redirect_error(validate_authorize_request(&state, &p)), "invalid_request");

        let mut p = params();
        p.scope = Some("admin".into());
        assert_eq!(redirect_error(validate_authorize_request(&state, &p)), "invalid_scope");
    }

    #[test]
    fn test_redirect_error_response_carries_state() {
        let response = AuthorizeError::Redirect {
            redirect_uri: "http://client.test:9094/oauth2?keep=1".into(),
            error: OAuthError::InvalidScope("nope".into()),
            state: Some("xyz".into()),
        }
        .into_response();

        assert_eq!(response.status(), axum::http::StatusCode::FOUND);
        let location = response.headers()[axum::http::header::LOCATION].to_str().unwrap();
        let url = Url::parse(location).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("keep".into(), "1".into())));
        assert!(pairs.contains(&("error".into(), "invalid_scope".into())));
        assert!(pairs.contains(&("state".into(), "xyz".into())));
    }
}
