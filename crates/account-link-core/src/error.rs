//! OAuth 2.0 error responses (RFC 6749 Section 5.2)

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;
use crate::token::TokenError;

/// Error body returned by the token endpoint and by pre-redirect
/// authorization failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("invalid_client: {0}")]
    InvalidClient(String),

    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),

    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    #[error("access_denied: {0}")]
    AccessDenied(String),

    /// Storage, signing or session failure. The detail is logged, never sent.
    #[error("server_error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// Machine-readable `error` code
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnauthorizedClient(_) => "unauthorized_client",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::UnsupportedResponseType(_) => "unsupported_response_type",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::AccessDenied(_) => "access_denied",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    /// Human-readable `error_description` safe to show the caller
    pub fn description(&self) -> &str {
        match self {
            OAuthError::ServerError(_) => "The server encountered an unexpected condition",
            OAuthError::InvalidRequest(d)
            | OAuthError::InvalidClient(d)
            | OAuthError::InvalidGrant(d)
            | OAuthError::UnauthorizedClient(d)
            | OAuthError::UnsupportedGrantType(d)
            | OAuthError::UnsupportedResponseType(d)
            | OAuthError::InvalidScope(d)
            | OAuthError::AccessDenied(d) => d,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OAuthError::AccessDenied(_) => StatusCode::FORBIDDEN,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn to_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.code().to_string(),
            error_description: Some(self.description().to_string()),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        match &self {
            OAuthError::ServerError(detail) => tracing::error!("Internal error: {}", detail),
            other => tracing::warn!("Request rejected: {}", other),
        }

        let mut response = (self.status(), Json(self.to_body())).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        if matches!(self, OAuthError::InvalidClient(_)) {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"oauth\""),
            );
        }
        response
    }
}

impl From<StoreError> for OAuthError {
    fn from(e: StoreError) -> Self {
        OAuthError::ServerError(e.to_string())
    }
}

impl From<TokenError> for OAuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Signing(_) | TokenError::Lifetime(_) | TokenError::Store(_) => {
                OAuthError::ServerError(e.to_string())
            }
            TokenError::Invalid | TokenError::InvalidRefresh | TokenError::ClientMismatch => {
                OAuthError::InvalidGrant(e.to_string())
            }
        }
    }
}
