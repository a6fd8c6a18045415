//! Local key/value store boundary.
//!
//! Values are JSON strings, last write wins per key. An entry may carry an
//! expiry; reads treat expired entries as absent and `sweep_expired`
//! deletes them.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;

pub const DRAFT_PREFIX: &str = "draft:";
pub const SESSION_PREFIX: &str = "session:";
pub const CACHE_PREFIX: &str = "msg:";
pub const SYNC_PREFIX: &str = "sync:";
pub const BLOCKED_PREFIX: &str = "blocked:";

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Returns whether the key existed.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Set or move the expiry of an existing key. Returns whether it existed.
    async fn expire(&self, key: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Live (unexpired) keys starting with `prefix`, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Delete every entry expired at `now`; returns how many were removed.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry count, expired entries included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Utc::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|e| e.live_at(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), Entry { value: value.to_string(), expires_at: None });
        Ok(())
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.entries.lock().insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Some(expires_at) },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn expire(&self, key: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key).filter(|e| e.live_at(now)) {
            Some(entry) => {
                entry.expires_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = Utc::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.live_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.live_at(now));
        Ok(before - entries.len())
    }
}
