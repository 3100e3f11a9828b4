//! Resource owner login and consent
//!
//! `POST /login` checks the submitted credentials, records the user in the
//! session under a fresh session id and sends the browser to `/auth`, whose
//! consent form resumes the pending authorization request.

use std::sync::Arc;

use account_link_core::http::found;
use axum::{
    extract::{rejection::FormRejection, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Form,
};
use serde::Deserialize;

use crate::html;
use crate::oauth::authorize::AuthorizeParams;
use crate::session::{LOGGED_IN_USER_ID, RETURN_REQUEST};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// GET /login - Show login page
pub async fn get_login() -> Html<String> {
    Html(html::login_page(None))
}

/// POST /login - Verify credentials and start an authenticated session
pub async fn post_login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        return (
            StatusCode::BAD_REQUEST,
            Html(html::login_page(Some("Username and password are required"))),
        )
            .into_response();
    };

    let user_id = match state.identity.verify(&form.username, &form.password).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            tracing::warn!("Failed login attempt for user {}", form.username);
            return (
                StatusCode::UNAUTHORIZED,
                Html(html::login_page(Some("Invalid username or password"))),
            )
                .into_response();
        }
        Err(e) => return internal_error(e),
    };

    let mut session = match state.sessions.start(&headers).await {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };
    if let Err(e) = session.set(LOGGED_IN_USER_ID, &user_id) {
        return internal_error(e);
    }
    // New id on privilege change
    session.regenerate().await;
    if let Err(e) = session.save().await {
        return internal_error(e);
    }

    tracing::info!("User {} authenticated successfully", user_id);

    let mut response = found("/auth");
    session.apply_cookie(&mut response);
    response
}

/// GET /auth - Consent page for the logged-in user
pub async fn get_auth(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let session = match state.sessions.start(&headers).await {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };

    let user_id = match session.get::<String>(LOGGED_IN_USER_ID) {
        Ok(Some(user_id)) => user_id,
        Ok(None) => return found("/login"),
        Err(e) => return internal_error(e),
    };
    let pending = session.get::<AuthorizeParams>(RETURN_REQUEST).ok().flatten();
    let client_id = pending
        .and_then(|p| p.client_id)
        .unwrap_or_else(|| state.credentials.client_id().to_string());

    Html(html::consent_page(&user_id, Some(&client_id))).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::error!("Login failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}
