//! Storage for authorization codes, refresh grants and sessions
//!
//! Everything lives in one [`KeyValueStore`]; each kind of record gets its own
//! key prefix. Codes and refresh tokens are stored under the SHA-256 hash of
//! their value, never the raw value.

use std::sync::Arc;
use std::time::Duration;

use account_link_core::crypto::hash_token;
use account_link_core::store::Result;
use account_link_core::token::RefreshGrant;
use account_link_core::{ChallengeMethod, KeyValueStore, Stored, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionRecord;

const AUTH_CODE_PREFIX: &str = "code";
const REFRESH_PREFIX: &str = "refresh";
const SESSION_PREFIX: &str = "session";

/// A pending authorization code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub client_id: String,
    /// Resource owner who approved the request
    pub user_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: ChallengeMethod,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

pub struct Storage {
    backend: Arc<dyn KeyValueStore>,
    auth_codes: Table<AuthorizationCode>,
}

impl Storage {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            auth_codes: Table::new(backend.clone(), AUTH_CODE_PREFIX),
            backend,
        }
    }

    // --- Authorization Code Management ---

    /// Store a new authorization code under the hash of `code`
    pub async fn store_auth_code(&self, code: &str, record: &AuthorizationCode, ttl: Duration) -> Result<()> {
        self.auth_codes.insert(&hash_token(code), record, Some(ttl)).await
    }

    /// Look up a code without consuming it
    pub async fn fetch_auth_code(&self, code: &str) -> Result<Option<Stored<AuthorizationCode>>> {
        self.auth_codes.fetch(&hash_token(code)).await
    }

    /// Consume a previously fetched code. False if another request got there first.
    pub async fn consume_auth_code(&self, code: &str, stored: &Stored<AuthorizationCode>) -> Result<bool> {
        self.auth_codes.consume(&hash_token(code), stored).await
    }

    /// Invalidate a code regardless of its contents
    pub async fn discard_auth_code(&self, code: &str) -> Result<bool> {
        self.auth_codes.remove(&hash_token(code)).await
    }

    // --- Tables for the other components ---

    pub fn refresh_grants(&self) -> Table<RefreshGrant> {
        Table::new(self.backend.clone(), REFRESH_PREFIX)
    }

    pub fn sessions(&self) -> Table<SessionRecord> {
        Table::new(self.backend.clone(), SESSION_PREFIX)
    }

    /// Clean up expired codes, grants and sessions
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let removed = self.backend.purge_expired().await?;
        if removed > 0 {
            tracing::info!("Cleaned up {} expired records", removed);
        }
        Ok(removed)
    }
}
