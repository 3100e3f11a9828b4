//! Bearer token validation endpoint for forward-auth proxies
//!
//! Returns 200 if the request carries a valid access token, the uniform
//! 401 otherwise. The proxy forwards the request only on 200.

use std::sync::Arc;

use account_link_core::authorize_bearer;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::AppState;

/// Header telling the upstream service which user the token belongs to
pub const SUBJECT_HEADER: HeaderName = HeaderName::from_static("x-auth-subject");

/// Handler for `GET /validate`
pub async fn handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let claims = match authorize_bearer(&headers, &state.verifier) {
        Ok(claims) => claims,
        Err(denied) => return denied.into_response(),
    };

    tracing::debug!("Request authenticated via access token for client {}", claims.aud);

    let mut response = (StatusCode::OK, "OK").into_response();
    if let Ok(subject) = HeaderValue::from_str(&claims.sub) {
        response.headers_mut().insert(SUBJECT_HEADER, subject);
    }
    response
}
