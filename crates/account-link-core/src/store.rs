//! Key-value storage for short-lived protocol state.
//!
//! Authorization codes, refresh grants, browser sessions and pending client
//! flows all go through [`KeyValueStore`]. The in-memory [`MemoryStore`] keeps
//! everything for the lifetime of the process; a persistent backend only has to
//! implement the four trait methods.
//!
//! [`Table`] layers typed JSON records and a key prefix on top of a shared store.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid TTL: {0:?}")]
    InvalidTtl(Duration),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Minimal storage capability needed by the protocol.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a live (non-expired) value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Remove a value. Returns true if a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove `key` only if its live value still equals `expected`.
    ///
    /// This is the single-use primitive: of several concurrent callers holding
    /// the same value, exactly one gets `true`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Drop expired entries. Returns how many were removed. Backends with
    /// native expiry can keep the default.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local store. Restarting the process drops everything.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(Utc::now()))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = match ttl {
            Some(ttl) => {
                let expires_at = chrono::Duration::from_std(ttl)
                    .ok()
                    .and_then(|delta| Utc::now().checked_add_signed(delta))
                    .ok_or(StoreError::InvalidTtl(ttl))?;
                Some(expires_at)
            }
            None => None,
        };
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .remove(key)
            .is_some_and(|e| e.is_live(Utc::now())))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let matches = entries
            .get(key)
            .is_some_and(|e| e.is_live(Utc::now()) && e.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }
}

/// A record read from a [`Table`], remembering the exact stored form so it
/// can later be consumed with compare-and-delete.
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub value: T,
    raw: String,
}

/// Typed view over a prefix of a [`KeyValueStore`].
pub struct Table<T> {
    store: Arc<dyn KeyValueStore>,
    prefix: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            prefix: self.prefix,
            _marker: PhantomData,
        }
    }
}

impl<T> Table<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: &'static str) -> Self {
        Self {
            store,
            prefix,
            _marker: PhantomData,
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.fetch(id).await?.map(|s| s.value))
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<Stored<T>>> {
        match self.store.get(&self.key(id)).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw)?;
                Ok(Some(Stored { value, raw }))
            }
            None => Ok(None),
        }
    }

    pub async fn insert(&self, id: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set(&self.key(id), raw, ttl).await
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.store.delete(&self.key(id)).await
    }

    /// Delete the record only if it is still exactly what was fetched.
    pub async fn consume(&self, id: &str, stored: &Stored<T>) -> Result<bool> {
        self.store.compare_and_delete(&self.key(id), &stored.raw).await
    }

    /// Fetch and consume in one step. `None` if absent or another caller won.
    pub async fn take(&self, id: &str) -> Result<Option<T>> {
        let Some(stored) = self.fetch(id).await? else {
            return Ok(None);
        };
        if self.consume(id, &stored).await? {
            Ok(Some(stored.value))
        } else {
            Ok(None)
        }
    }
}
