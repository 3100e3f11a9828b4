//! Protected resource served to holders of a linked access token

use std::sync::Arc;

use account_link_core::authorize_bearer;
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use crate::ClientState;

pub const ITEMS: &str = "Vitrola, Fita cassete, Zip drive";

/// `GET /listar-itens`
pub async fn list_items(State(state): State<Arc<ClientState>>, headers: HeaderMap) -> Response {
    match authorize_bearer(&headers, &state.verifier) {
        Ok(claims) => {
            tracing::debug!("Serving items to {}", claims.sub);
            ITEMS.into_response()
        }
        Err(denied) => denied.into_response(),
    }
}
