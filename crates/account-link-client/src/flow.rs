//! In-flight authorization flows and linked tokens
//!
//! Each flow gets a random id that doubles as the OAuth `state` sent to the
//! authorization server. The callback consumes the pending flow exactly once;
//! the resulting token is cached under the same id, which the browser keeps
//! in the `account_link_flow` cookie.

use std::sync::Arc;
use std::time::Duration;

use account_link_core::crypto::generate_random_string;
use account_link_core::store::Result;
use account_link_core::{expiry_after, KeyValueStore, Table, TokenResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;

pub const FLOW_COOKIE_NAME: &str = "account_link_flow";

const FLOW_ID_LENGTH: usize = 32;

/// A flow waiting for its callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFlow {
    /// Where the downstream consumer wants the token delivered
    pub downstream_redirect_uri: String,
    /// The downstream consumer's own state, echoed back to it
    pub caller_state: Option<String>,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
}

/// A token obtained for a flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// When the access token stops being valid
    pub expiry: DateTime<Utc>,
}

impl CachedToken {
    /// An `expires_in` too large to represent counts as already expired.
    pub fn from_response(response: TokenResponse) -> Self {
        let now = Utc::now();
        Self {
            expiry: expiry_after(now, response.expires_in).unwrap_or(now),
            access_token: response.access_token,
            token_type: response.token_type,
            refresh_token: response.refresh_token,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiry <= Utc::now()
    }
}

pub struct FlowStore {
    pending: Table<PendingFlow>,
    tokens: Table<CachedToken>,
    flow_lifetime: Duration,
    token_lifetime: Duration,
}

impl FlowStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        Self {
            pending: Table::new(backend.clone(), "flow"),
            tokens: Table::new(backend, "token"),
            flow_lifetime: Duration::from_secs(config.flow_lifetime_secs),
            token_lifetime: Duration::from_secs(config.token_cache_lifetime_secs),
        }
    }

    pub fn token_lifetime(&self) -> Duration {
        self.token_lifetime
    }

    /// Record a new flow. Returns its id.
    pub async fn begin(&self, flow: &PendingFlow) -> Result<String> {
        let flow_id = generate_random_string(FLOW_ID_LENGTH);
        self.pending
            .insert(&flow_id, flow, Some(self.flow_lifetime))
            .await?;
        Ok(flow_id)
    }

    /// Consume a pending flow. `None` if unknown, expired or already used.
    pub async fn take(&self, flow_id: &str) -> Result<Option<PendingFlow>> {
        self.pending.take(flow_id).await
    }

    pub async fn cache_token(&self, flow_id: &str, token: &CachedToken) -> Result<()> {
        self.tokens
            .insert(flow_id, token, Some(self.token_lifetime))
            .await
    }

    pub async fn cached_token(&self, flow_id: &str) -> Result<Option<CachedToken>> {
        self.tokens.get(flow_id).await
    }

    /// Forget a linked token the server no longer honours.
    pub async fn drop_token(&self, flow_id: &str) -> Result<bool> {
        self.tokens.remove(flow_id).await
    }
}
