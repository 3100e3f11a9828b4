//! Relying-party endpoints: start a link, take the callback, refresh

use std::sync::Arc;

use account_link_core::http::{cookie_value, found, set_cookie};
use account_link_core::{PkcePair, StoreError};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use cookie::{Cookie, SameSite};
use serde::Deserialize;
use url::Url;

use crate::error::ClientError;
use crate::flow::{CachedToken, PendingFlow, FLOW_COOKIE_NAME};
use crate::ClientState;

#[derive(Debug, Deserialize)]
pub struct BeginQuery {
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
}

/// `GET /` - start linking on behalf of a downstream consumer
pub async fn begin_flow(
    State(state): State<Arc<ClientState>>,
    Query(query): Query<BeginQuery>,
) -> Result<Response, ClientError> {
    let downstream = query
        .redirect_uri
        .ok_or_else(|| ClientError::InvalidRequest("redirect_uri is required".to_string()))?;
    validate_downstream(&state, &downstream)?;

    let pkce = PkcePair::generate();
    let flow_id = state
        .flows
        .begin(&PendingFlow {
            downstream_redirect_uri: downstream,
            caller_state: query.state,
            code_verifier: pkce.verifier.clone(),
            created_at: Utc::now(),
        })
        .await?;

    let mut authorize = state.authorize_endpoint.clone();
    authorize
        .query_pairs_mut()
        .append_pair("client_id", &state.settings.client_id)
        .append_pair("redirect_uri", &state.settings.redirect_url)
        .append_pair("response_type", "code")
        .append_pair("scope", &state.config.scope)
        .append_pair("state", &flow_id)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", pkce.method().as_str());

    tracing::info!("Started authorization flow");
    Ok(found(authorize.as_str()))
}

fn validate_downstream(state: &ClientState, redirect_uri: &str) -> Result<(), ClientError> {
    let url = Url::parse(redirect_uri)
        .map_err(|_| ClientError::InvalidRequest("redirect_uri must be an absolute URL".to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::InvalidRequest(
            "redirect_uri must use http or https".to_string(),
        ));
    }
    if url.fragment().is_some() {
        return Err(ClientError::InvalidRequest(
            "redirect_uri must not contain a fragment".to_string(),
        ));
    }

    let allowed = &state.config.allowed_downstream_origins;
    if !allowed.is_empty() {
        let origin = url.origin();
        let permitted = allowed
            .iter()
            .filter_map(|o| Url::parse(o).ok())
            .any(|o| o.origin() == origin);
        if !permitted {
            return Err(ClientError::InvalidRequest(
                "redirect_uri is not an allowed destination".to_string(),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// `GET /oauth2` - authorization server callback
pub async fn handle_callback(
    State(state): State<Arc<ClientState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ClientError> {
    if let Some(error) = query.error {
        // Drop the flow so the state cannot be replayed
        if let Some(flow_id) = &query.state {
            state.flows.take(flow_id).await?;
        }
        return Err(ClientError::AuthorizationFailed {
            error,
            description: query.error_description,
        });
    }

    let flow_id = query.state.ok_or(ClientError::StateMismatch)?;
    let flow = state
        .flows
        .take(&flow_id)
        .await?
        .ok_or(ClientError::StateMismatch)?;

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ClientError::InvalidRequest("code is required".to_string()))?;

    let response = state
        .tokens
        .exchange_code(&code, &flow.code_verifier, &state.settings.redirect_url)
        .await?;
    let token = CachedToken::from_response(response);
    state.flows.cache_token(&flow_id, &token).await?;

    tracing::info!("Linked account, delivering token downstream");

    let mut fragment = url::form_urlencoded::Serializer::new(String::new());
    if let Some(caller_state) = &flow.caller_state {
        fragment.append_pair("state", caller_state);
    }
    fragment
        .append_pair("access_token", &token.access_token)
        .append_pair("token_type", &token.token_type);

    let mut downstream = Url::parse(&flow.downstream_redirect_uri)
        .map_err(|_| ClientError::InvalidRequest("stored redirect_uri is invalid".to_string()))?;
    downstream.set_fragment(Some(&fragment.finish()));

    let cookie = Cookie::build((FLOW_COOKIE_NAME, flow_id))
        .path("/")
        .http_only(true)
        .secure(state.config.secure_cookie)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(
            state.flows.token_lifetime().as_secs() as i64,
        ))
        .build();

    let mut response = found(downstream.as_str());
    set_cookie(&mut response, &cookie);
    Ok(response)
}

/// `GET /refresh` - force a refresh of the linked token and show it
pub async fn refresh_token(
    State(state): State<Arc<ClientState>>,
    headers: HeaderMap,
) -> Result<Response, ClientError> {
    let Some(flow_id) = cookie_value(&headers, FLOW_COOKIE_NAME) else {
        return Ok(found("/"));
    };
    let Some(mut token) = state.flows.cached_token(&flow_id).await? else {
        return Ok(found("/"));
    };
    let Some(refresh_token) = token.refresh_token.clone() else {
        tracing::warn!("Cached token has no refresh token");
        return Ok(found("/"));
    };

    // Force expiry so the old access token is never handed out again
    token.expiry = Utc::now();
    state.flows.cache_token(&flow_id, &token).await?;

    let refreshed = match state.tokens.refresh(&refresh_token).await {
        Ok(response) => CachedToken::from_response(response),
        Err(ClientError::Rejected { status, body }) if body.error == "invalid_grant" => {
            // The grant is dead; the next /refresh starts over from /
            state.flows.drop_token(&flow_id).await?;
            tracing::warn!("Refresh token rejected, dropped cached token");
            return Err(ClientError::Rejected { status, body });
        }
        Err(e) => return Err(e),
    };
    state.flows.cache_token(&flow_id, &refreshed).await?;
    tracing::info!("Refreshed linked token");

    let body = serde_json::to_string_pretty(&refreshed).map_err(StoreError::from)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}
