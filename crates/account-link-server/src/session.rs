//! Browser sessions for the login and authorize endpoints
//!
//! A session is a small JSON map stored in the key-value store under a random
//! id carried by the `account_link_session` cookie. [`SessionStore::start`]
//! takes a per-id async lock that the returned [`Session`] holds until it is
//! dropped, so concurrent requests from one browser run their
//! read-modify-write cycles one at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use account_link_core::crypto::generate_random_string;
use account_link_core::http::{cookie_value, set_cookie};
use account_link_core::{StoreError, Table};
use axum::{http::HeaderMap, response::Response};
use cookie::{Cookie, SameSite};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::SessionConfig;

pub const SESSION_COOKIE_NAME: &str = "account_link_session";

/// Session key holding the authenticated user until the next authorization
pub const LOGGED_IN_USER_ID: &str = "logged_in_user_id";

/// Session key holding the authorization request waiting for login
pub const RETURN_REQUEST: &str = "return_request";

const SESSION_ID_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Session value could not be (de)serialized: {0}")]
    Value(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Persisted form of a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    values: HashMap<String, serde_json::Value>,
}

pub struct SessionStore {
    records: Table<SessionRecord>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    lifetime: Duration,
    secure_cookie: bool,
}

impl SessionStore {
    pub fn new(records: Table<SessionRecord>, config: &SessionConfig) -> Self {
        Self {
            records,
            locks: DashMap::new(),
            lifetime: Duration::from_secs(config.session_lifetime_secs),
            secure_cookie: config.secure_cookie,
        }
    }

    /// Resume the session named by the request cookie, or begin a new one.
    ///
    /// A cookie naming no live session is ignored and a fresh id is issued.
    pub async fn start(&self, headers: &HeaderMap) -> Result<Session<'_>> {
        if let Some(id) = cookie_value(headers, SESSION_COOKIE_NAME) {
            let guard = self.lock(&id).await;
            if let Some(record) = self.records.get(&id).await? {
                return Ok(Session {
                    store: self,
                    id,
                    retired: None,
                    record,
                    is_new: false,
                    dirty: false,
                    send_cookie: false,
                    guards: vec![guard],
                });
            }
            tracing::debug!("Ignoring unknown session cookie");
        }

        let id = generate_random_string(SESSION_ID_LENGTH);
        let guard = self.lock(&id).await;
        Ok(Session {
            store: self,
            id,
            retired: None,
            record: SessionRecord::default(),
            is_new: true,
            dirty: false,
            send_cookie: false,
            guards: vec![guard],
        })
    }

    async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop lock entries nobody is holding. Returns how many were removed.
    pub fn prune_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    fn cookie(&self, id: &str) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE_NAME, id.to_string()))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookie)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.lifetime.as_secs() as i64))
            .build()
    }
}

/// An open session. Mutations are kept in memory until [`Session::save`].
pub struct Session<'a> {
    store: &'a SessionStore,
    id: String,
    /// Previous id after [`Session::regenerate`], removed on save
    retired: Option<String>,
    record: SessionRecord,
    is_new: bool,
    dirty: bool,
    send_cookie: bool,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Session<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.record.values.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.record.values.insert(key.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    /// Returns true if the key was present.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.record.values.remove(key).is_some();
        self.dirty |= removed;
        removed
    }

    /// Read and remove a value (one-time claim).
    pub fn take<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        let value = self.get(key)?;
        self.delete(key);
        Ok(value)
    }

    /// Move the session to a fresh id, keeping its values.
    pub async fn regenerate(&mut self) {
        let id = generate_random_string(SESSION_ID_LENGTH);
        let guard = self.store.lock(&id).await;
        self.guards.push(guard);

        let old = std::mem::replace(&mut self.id, id);
        if !self.is_new {
            self.retired = Some(old);
        }
        self.dirty = true;
    }

    /// Persist pending changes and refresh the session lifetime.
    pub async fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.store
            .records
            .insert(&self.id, &self.record, Some(self.store.lifetime))
            .await?;
        if let Some(old) = self.retired.take() {
            self.store.records.remove(&old).await?;
        }
        if self.is_new || self.guards.len() > 1 {
            self.send_cookie = true;
        }
        self.dirty = false;
        Ok(())
    }

    /// Cookie naming this session
    pub fn cookie(&self) -> Cookie<'static> {
        self.store.cookie(&self.id)
    }

    /// Attach `Set-Cookie` when the browser does not yet know this id.
    pub fn apply_cookie(&self, response: &mut Response) {
        if self.send_cookie {
            set_cookie(response, &self.cookie());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_link_core::{KeyValueStore, MemoryStore};
    use axum::http::{header, HeaderValue};
    use axum::response::IntoResponse;

    fn store() -> SessionStore {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        SessionStore::new(
            Table::new(backend, "session"),
            &SessionConfig {
                session_lifetime_secs: 60,
                secure_cookie: false,
            },
        )
    }

    fn cookie_headers(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("other=1; {}={}", SESSION_COOKIE_NAME, id)).unwrap(),
        );
        headers
    }

    fn response_cookie(session: &Session<'_>) -> Option<String> {
        let mut response = ().into_response();
        session.apply_cookie(&mut response);
        response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_new_session_round_trip() {
        let store = store();
        let id = {
            let mut session = store.start(&HeaderMap::new()).await.unwrap();
            assert!(session.is_new());
            session.set("user", &"test").unwrap();
            session.save().await.unwrap();

            let cookie = response_cookie(&session).unwrap();
            assert!(cookie.contains("HttpOnly"));
            assert!(cookie.contains("SameSite=Lax"));
            assert!(cookie.contains("Path=/"));
            session.id().to_string()
        };

        let session = store.start(&cookie_headers(&id)).await.unwrap();
        assert!(!session.is_new());
        assert_eq!(session.get::<String>("user").unwrap().as_deref(), Some("test"));
        // known session: no cookie to resend
        assert!(response_cookie(&session).is_none());
    }

    #[tokio::test]
    async fn test_unknown_cookie_gets_fresh_id() {
        let store = store();
        let session = store.start(&cookie_headers("attacker-chosen")).await.unwrap();
        assert!(session.is_new());
        assert_ne!(session.id(), "attacker-chosen");
    }

    #[tokio::test]
    async fn test_unsaved_new_session_sets_no_cookie() {
        let store = store();
        let mut session = store.start(&HeaderMap::new()).await.unwrap();
        session.save().await.unwrap();
        assert!(response_cookie(&session).is_none());
    }

    #[tokio::test]
    async fn test_take_is_one_time() {
        let store = store();
        let id = {
            let mut session = store.start(&HeaderMap::new()).await.unwrap();
            session.set(LOGGED_IN_USER_ID, &"test").unwrap();
            session.save().await.unwrap();
            session.id().to_string()
        };
        {
            let mut session = store.start(&cookie_headers(&id)).await.unwrap();
            let user: Option<String> = session.take(LOGGED_IN_USER_ID).unwrap();
            assert_eq!(user.as_deref(), Some("test"));
            session.save().await.unwrap();
        }
        let session = store.start(&cookie_headers(&id)).await.unwrap();
        assert!(session.get::<String>(LOGGED_IN_USER_ID).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_regenerate_retires_old_id() {
        let store = store();
        let old_id = {
            let mut session = store.start(&HeaderMap::new()).await.unwrap();
            session.set("k", &1).unwrap();
            session.save().await.unwrap();
            session.id().to_string()
        };

        let new_id = {
            let mut session = store.start(&cookie_headers(&old_id)).await.unwrap();
            session.regenerate().await;
            session.save().await.unwrap();
            assert!(response_cookie(&session).unwrap().contains(session.id()));
            session.id().to_string()
        };
        assert_ne!(old_id, new_id);

        assert!(store.start(&cookie_headers(&old_id)).await.unwrap().is_new());
        let session = store.start(&cookie_headers(&new_id)).await.unwrap();
        assert_eq!(session.get::<i32>("k").unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_requests_serialize() {
        let store = Arc::new(store());
        let id = {
            let mut session = store.start(&HeaderMap::new()).await.unwrap();
            session.set("count", &0).unwrap();
            session.save().await.unwrap();
            session.id().to_string()
        };

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let headers = cookie_headers(&id);
                tokio::spawn(async move {
                    let mut session = store.start(&headers).await.unwrap();
                    let count: i32 = session.get("count").unwrap().unwrap();
                    tokio::task::yield_now().await;
                    session.set("count", &(count + 1)).unwrap();
                    session.save().await.unwrap();
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let session = store.start(&cookie_headers(&id)).await.unwrap();
        assert_eq!(session.get::<i32>("count").unwrap(), Some(8));
    }

    #[tokio::test]
    async fn test_prune_locks() {
        let store = store();
        {
            let _session = store.start(&HeaderMap::new()).await.unwrap();
            assert_eq!(store.prune_locks(), 0);
        }
        assert_eq!(store.prune_locks(), 1);
    }
}
