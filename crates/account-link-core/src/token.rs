//! Access and refresh tokens
//!
//! Access tokens are HS256 JWTs verified statelessly (signature, issuer,
//! audience, expiry). Refresh tokens are opaque random strings; only their
//! hash is stored, together with the user and client they were issued to.
//! Every refresh consumes the presented refresh token and issues a new one in
//! the same chain.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{constant_time_eq, generate_random_string, hash_token};
use crate::store::{StoreError, Table};

/// The only signing algorithm issued or accepted.
pub const ALGORITHM: Algorithm = Algorithm::HS256;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// Upper bound accepted for any configured lifetime (10 years).
pub const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 3600;

/// `now + secs`, or `None` when the result does not fit a timestamp.
pub fn expiry_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    now.checked_add_signed(Duration::try_seconds(secs)?)
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    /// Deliberately carries no detail; callers must not learn why.
    #[error("Invalid token")]
    Invalid,

    #[error("Refresh token is invalid or expired")]
    InvalidRefresh,

    #[error("Refresh token was issued to another client")]
    ClientMismatch,

    #[error("Token lifetime of {0} seconds is out of range")]
    Lifetime(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, TokenError>;

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    /// Resource owner
    pub sub: String,
    /// Client the token was issued to
    pub aud: String,
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Token endpoint success body (RFC 6749 Section 5.1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub claims: Claims,
}

impl Token {
    pub fn to_response(&self) -> TokenResponse {
        TokenResponse {
            access_token: self.access_token.clone(),
            token_type: self.token_type.clone(),
            expires_in: self.expires_in,
            refresh_token: Some(self.refresh_token.clone()),
            scope: Some(self.claims.scope.clone()),
        }
    }
}

/// Server-side record for an outstanding refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshGrant {
    pub user_id: String,
    pub client_id: String,
    pub scope: String,
    /// Shared by every refresh token descended from one authorization
    pub chain_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// `iss` claim, normally the authorization server's public URL
    pub issuer: String,
    pub access_token_lifetime_secs: u64,
    pub refresh_token_lifetime_secs: u64,
}

/// Checks bearer tokens against one issuer and audience.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new_hs256(secret: &[u8], issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verify signature, algorithm and claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Rejected bearer token: {:?}", e.kind());
                TokenError::Invalid
            })
    }
}

/// Mints access tokens and rotates refresh grants.
pub struct TokenIssuer {
    config: IssuerConfig,
    encoding_key: EncodingKey,
    secret: Vec<u8>,
    refresh_grants: Table<RefreshGrant>,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], config: IssuerConfig, refresh_grants: Table<RefreshGrant>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            secret: secret.to_vec(),
            config,
            refresh_grants,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Verifier accepting this issuer's tokens for `audience`.
    pub fn verifier(&self, audience: &str) -> TokenVerifier {
        TokenVerifier::new_hs256(&self.secret, &self.config.issuer, audience)
    }

    /// Issue a token pair starting a new refresh chain.
    pub async fn mint(&self, user_id: &str, client_id: &str, scope: &str) -> Result<Token> {
        let chain_id = uuid::Uuid::new_v4().to_string();
        self.issue(user_id, client_id, scope, chain_id).await
    }

    /// Exchange a refresh token for a new pair. The presented refresh token
    /// is consumed; the new one continues its chain.
    pub async fn refresh(&self, refresh_token: &str, client_id: &str) -> Result<Token> {
        let key = hash_token(refresh_token);
        let stored = self
            .refresh_grants
            .fetch(&key)
            .await?
            .ok_or(TokenError::InvalidRefresh)?;

        if stored.value.expires_at <= Utc::now() {
            self.refresh_grants.remove(&key).await?;
            return Err(TokenError::InvalidRefresh);
        }
        if !constant_time_eq(&stored.value.client_id, client_id) {
            return Err(TokenError::ClientMismatch);
        }
        if !self.refresh_grants.consume(&key, &stored).await? {
            // Someone else rotated it first
            return Err(TokenError::InvalidRefresh);
        }

        let grant = stored.value;
        self.issue(&grant.user_id, &grant.client_id, &grant.scope, grant.chain_id)
            .await
    }

    async fn issue(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &str,
        chain_id: String,
    ) -> Result<Token> {
        let now = Utc::now();
        let access_lifetime = self.config.access_token_lifetime_secs;
        let expires_at =
            expiry_after(now, access_lifetime).ok_or(TokenError::Lifetime(access_lifetime))?;
        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: user_id.to_string(),
            aud: client_id.to_string(),
            scope: scope.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let access_token =
            encode(&Header::new(ALGORITHM), &claims, &self.encoding_key).map_err(TokenError::Signing)?;

        let refresh_token = generate_random_string(48);
        let refresh_lifetime = self.config.refresh_token_lifetime_secs;
        let refresh_expires_at =
            expiry_after(now, refresh_lifetime).ok_or(TokenError::Lifetime(refresh_lifetime))?;
        let grant = RefreshGrant {
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            chain_id,
            expires_at: refresh_expires_at,
        };
        self.refresh_grants
            .insert(
                &hash_token(&refresh_token),
                &grant,
                Some(StdDuration::from_secs(refresh_lifetime)),
            )
            .await?;

        Ok(Token {
            access_token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: access_lifetime,
            expires_at,
            refresh_token,
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use std::sync::Arc;

    const SECRET: &[u8] = b"test-signing-secret";
    const ISSUER: &str = "https://auth.example";

    fn issuer() -> TokenIssuer {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        TokenIssuer::new(
            SECRET,
            IssuerConfig {
                issuer: ISSUER.to_string(),
                access_token_lifetime_secs: 3600,
                refresh_token_lifetime_secs: 86400,
            },
            Table::new(store, "refresh"),
        )
    }

    fn claims_for(sub: &str) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            iss: ISSUER.to_string(),
            sub: sub.to_string(),
            aud: "client".to_string(),
            scope: "all".to_string(),
            iat: now,
            exp: now + 600,
            jti: "jti".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mint_and_verify() {
        let issuer = issuer();
        let token = issuer.mint("test", "client", "all").await.unwrap();

        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, 3600);
        assert_eq!(token.refresh_token.len(), 48);

        let claims = issuer.verifier("client").verify(&token.access_token).unwrap();
        assert_eq!(claims.sub, "test");
        assert_eq!(claims.aud, "client");
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.scope, "all");
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let issuer = issuer();
        let token = issuer.mint("test", "client", "all").await.unwrap();
        assert!(issuer.verifier("other").verify(&token.access_token).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims_for("test"),
            &EncodingKey::from_secret(b"attacker-secret"),
        )
        .unwrap();
        let verifier = TokenVerifier::new_hs256(SECRET, ISSUER, "client");
        assert!(matches!(verifier.verify(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_other_hmac_algorithm_rejected() {
        // Same key, different algorithm
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims_for("test"),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        let verifier = TokenVerifier::new_hs256(SECRET, ISSUER, "client");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_unsigned_token_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims_for("test")).unwrap());
        let token = format!("{}.{}.", header, payload);

        let verifier = TokenVerifier::new_hs256(SECRET, ISSUER, "client");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = claims_for("test");
        claims.exp = Utc::now().timestamp() - 5;
        let token = encode(&Header::new(ALGORITHM), &claims, &EncodingKey::from_secret(SECRET)).unwrap();

        let verifier = TokenVerifier::new_hs256(SECRET, ISSUER, "client");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let verifier = TokenVerifier::new_hs256(SECRET, ISSUER, "client");
        for token in ["", "abc", "a.b.c", "Bearer x"] {
            assert!(verifier.verify(token).is_err(), "{token:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_refresh_preserves_user_and_extends_expiry() {
        let issuer = issuer();
        let first = issuer.mint("test", "client", "all").await.unwrap();
        let second = issuer.refresh(&first.refresh_token, "client").await.unwrap();

        assert!(second.expires_at > first.expires_at);
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_ne!(second.claims.jti, first.claims.jti);

        let claims = issuer.verifier("client").verify(&second.access_token).unwrap();
        assert_eq!(claims.sub, "test");
    }

    #[tokio::test]
    async fn test_refresh_token_is_single_use() {
        let issuer = issuer();
        let first = issuer.mint("test", "client", "all").await.unwrap();
        issuer.refresh(&first.refresh_token, "client").await.unwrap();

        assert!(matches!(
            issuer.refresh(&first.refresh_token, "client").await,
            Err(TokenError::InvalidRefresh)
        ));
    }

    #[tokio::test]
    async fn test_refresh_by_other_client_rejected() {
        let issuer = issuer();
        let first = issuer.mint("test", "client", "all").await.unwrap();

        assert!(matches!(
            issuer.refresh(&first.refresh_token, "intruder").await,
            Err(TokenError::ClientMismatch)
        ));
        // still usable by its owner
        assert!(issuer.refresh(&first.refresh_token, "client").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_refresh_token_rejected() {
        let issuer = issuer();
        assert!(matches!(
            issuer.refresh("nope", "client").await,
            Err(TokenError::InvalidRefresh)
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_is_an_error() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let issuer = TokenIssuer::new(
            SECRET,
            IssuerConfig {
                issuer: ISSUER.to_string(),
                access_token_lifetime_secs: 10_000_000_000_000_000,
                refresh_token_lifetime_secs: 86400,
            },
            Table::new(store, "refresh"),
        );
        assert!(matches!(
            issuer.mint("test", "client", "all").await,
            Err(TokenError::Lifetime(10_000_000_000_000_000))
        ));
    }

    #[test]
    fn test_expiry_after_bounds() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 60), Some(now + Duration::seconds(60)));
        assert!(expiry_after(now, MAX_LIFETIME_SECS).is_some());
        assert_eq!(expiry_after(now, u64::MAX), None);
        assert_eq!(expiry_after(now, i64::MAX as u64), None);
    }
}
