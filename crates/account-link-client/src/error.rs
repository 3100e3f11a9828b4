//! Errors surfaced by the client's endpoints

use account_link_core::{ErrorResponse, StoreError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Bad input from the browser or downstream consumer
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Callback `state` names no in-flight flow
    #[error("Unknown or already used state")]
    StateMismatch,

    /// The authorization server redirected back with an error
    #[error("Authorization failed: {error}")]
    AuthorizationFailed {
        error: String,
        description: Option<String>,
    },

    /// The token endpoint answered with an OAuth error
    #[error("Token endpoint rejected the request ({status}): {}", .body.error)]
    Rejected { status: u16, body: ErrorResponse },

    #[error("Token endpoint unreachable: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClientError {
    pub fn status(&self) -> StatusCode {
        match self {
            ClientError::InvalidRequest(_)
            | ClientError::StateMismatch
            | ClientError::AuthorizationFailed { .. } => StatusCode::BAD_REQUEST,
            // The user's grant is gone; they have to link again
            ClientError::Rejected { body, .. } if body.error == "invalid_grant" => StatusCode::BAD_REQUEST,
            ClientError::Rejected { .. } | ClientError::Upstream(_) | ClientError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn to_body(&self) -> ErrorResponse {
        let (error, description) = match self {
            ClientError::InvalidRequest(d) => ("invalid_request", Some(d.clone())),
            ClientError::StateMismatch => (
                "invalid_state",
                Some("State does not match any pending authorization".to_string()),
            ),
            ClientError::AuthorizationFailed { error, description } => {
                return ErrorResponse {
                    error: error.clone(),
                    error_description: description.clone(),
                };
            }
            ClientError::Rejected { body, .. } if body.error == "invalid_grant" => {
                ("invalid_grant", body.error_description.clone())
            }
            ClientError::Rejected { .. } | ClientError::Upstream(_) | ClientError::Store(_) => (
                "server_error",
                Some("The authorization could not be completed".to_string()),
            ),
        };
        ErrorResponse {
            error: error.to_string(),
            error_description: description,
        }
    }
}

impl IntoResponse for ClientError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }
        (status, Json(self.to_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(code: &str) -> ClientError {
        ClientError::Rejected {
            status: 400,
            body: ErrorResponse {
                error: code.to_string(),
                error_description: Some("detail".into()),
            },
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ClientError::StateMismatch.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rejected("invalid_grant").status(), StatusCode::BAD_REQUEST);
        assert_eq!(rejected("invalid_client").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_upstream_detail_not_exposed() {
        let body = rejected("invalid_client").to_body();
        assert_eq!(body.error, "server_error");
        assert_ne!(body.error_description.as_deref(), Some("detail"));
    }
}
