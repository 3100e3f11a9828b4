//! Bearer token guard for protected resources
//!
//! Every failure (missing header, wrong scheme, bad signature, expired token)
//! produces the same [`Unauthorized`] response.

use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::token::{Claims, TokenVerifier};

/// Body of every denied request
pub const UNAUTHORIZED_MESSAGE: &str = "Acesso não autorizado";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unauthorized;

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::UNAUTHORIZED, UNAUTHORIZED_MESSAGE).into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Grant or deny a request based on its bearer token.
pub fn authorize_bearer(headers: &HeaderMap, verifier: &TokenVerifier) -> Result<Claims, Unauthorized> {
    let token = bearer_token(headers).ok_or_else(|| {
        tracing::debug!("No bearer token present");
        Unauthorized
    })?;
    verifier.verify(token).map_err(|_| Unauthorized)
}
