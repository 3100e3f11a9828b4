//! HTTP helpers shared by the authorization server and the client

use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use cookie::Cookie;
use tower_http::cors::{Any, CorsLayer};

/// `302 Found` to `location`.
///
/// The protocol redirects are plain 302s; axum's `Redirect::to` answers 303.
pub fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => {
            tracing::error!("Refusing to redirect to a location that is not a valid header value");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Value of the first non-empty cookie called `name` in the request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_str) = cookie_header.to_str() else {
            continue;
        };
        for cookie_part in cookie_str.split(';') {
            if let Ok(cookie) = Cookie::parse(cookie_part.trim()) {
                if cookie.name() == name && !cookie.value().is_empty() {
                    return Some(cookie.value().to_string());
                }
            }
        }
    }
    None
}

/// Append a `Set-Cookie` header.
pub fn set_cookie(response: &mut Response, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(_) => tracing::error!("Cookie {} is not a valid header value", cookie.name()),
    }
}

/// Permissive CORS answering every preflight before routing.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::POST,
            Method::GET,
            Method::OPTIONS,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT_ENCODING,
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static("x-requested-with"),
            header::AUTHORIZATION,
        ])
}
