//! Opt-in cache of decrypted messages.
//!
//! Entries live under `msg:<session>:<msg_id>` with an expiry of
//! `cached_at + ttl`, so `ExpirySweeper` drops old ones. A per-session
//! `sync:<session>` timestamp tells callers when the ledger should be asked
//! again. Disabled by default; while disabled every write is a no-op and
//! every read comes back empty.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mp_proto::{Message, MessageContent, MessageMetadata, SessionId};

use crate::error::StoreError;
use crate::local::{LocalStore, CACHE_PREFIX, SYNC_PREFIX};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub sync_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(30 * 24 * 60 * 60),
            sync_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedMessage {
    metadata: MessageMetadata,
    content: Option<MessageContent>,
    #[serde(default)]
    read: bool,
    /// Hidden on this side only.
    #[serde(default)]
    hidden: bool,
    cached_at: DateTime<Utc>,
}

impl CachedMessage {
    fn into_message(self) -> Message {
        Message { metadata: self.metadata, content: self.content, read: self.read }
    }
}

pub fn cache_key(session: &SessionId, msg_id: u64) -> String {
    format!("{CACHE_PREFIX}{session}:{msg_id:020}")
}

fn session_prefix(session: &SessionId) -> String {
    format!("{CACHE_PREFIX}{session}:")
}

fn sync_key(session: &SessionId) -> String {
    format!("{SYNC_PREFIX}{session}")
}

/// Text a keyword search looks at.
fn searchable(content: &MessageContent) -> Option<&str> {
    match content {
        MessageContent::Text { body } => Some(body),
        MessageContent::Media { caption, .. } => caption.as_deref(),
        MessageContent::Metadata { text, .. } => Some(text),
    }
}

#[derive(Clone)]
pub struct MessageCache {
    store: Arc<dyn LocalStore>,
    config: CacheConfig,
}

impl MessageCache {
    pub fn new(store: Arc<dyn LocalStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.ttl).unwrap_or_else(|_| chrono::Duration::days(30))
    }

    /// Store or refresh messages. Content already cached is kept when the
    /// new copy has none; read and hidden flags are never cleared here.
    pub async fn cache_messages(&self, messages: &[Message]) -> Result<usize, StoreError> {
        if !self.config.enabled {
            return Ok(0);
        }
        let now = Utc::now();
        for message in messages {
            let session = &message.metadata.session_id;
            let key = cache_key(session, message.id());
            let mut entry = CachedMessage {
                metadata: message.metadata.clone(),
                content: message.content.clone(),
                read: message.read,
                hidden: false,
                cached_at: now,
            };
            if let Some(previous) = self.read_entry(&key).await? {
                entry.read |= previous.read;
                entry.hidden = previous.hidden;
                if entry.content.is_none() {
                    entry.content = previous.content;
                }
            }
            self.write_entry(&key, &entry).await?;
        }
        debug!(count = messages.len(), "messages cached");
        Ok(messages.len())
    }

    /// Visible cached messages of a session in ledger order.
    pub async fn cached_messages(&self, session: &SessionId) -> Result<Vec<Message>, StoreError> {
        let mut out: Vec<Message> = self
            .entries(&session_prefix(session))
            .await?
            .into_iter()
            .filter(|e| !e.hidden)
            .map(CachedMessage::into_message)
            .collect();
        out.sort_by_key(Message::position);
        Ok(out)
    }

    pub async fn mark_read(&self, session: &SessionId, msg_id: u64) -> Result<bool, StoreError> {
        self.update(session, msg_id, |e| e.read = true).await
    }

    /// Hide one message locally; the other side keeps its copy.
    pub async fn hide(&self, session: &SessionId, msg_id: u64) -> Result<bool, StoreError> {
        self.update(session, msg_id, |e| e.hidden = true).await
    }

    async fn update(
        &self,
        session: &SessionId,
        msg_id: u64,
        f: impl FnOnce(&mut CachedMessage),
    ) -> Result<bool, StoreError> {
        if !self.config.enabled {
            return Ok(false);
        }
        let key = cache_key(session, msg_id);
        let Some(mut entry) = self.read_entry(&key).await? else {
            return Ok(false);
        };
        f(&mut entry);
        self.write_entry(&key, &entry).await?;
        Ok(true)
    }

    /// True when the session was never synced or its last sync is older
    /// than the sync interval.
    pub async fn needs_sync(&self, session: &SessionId) -> Result<bool, StoreError> {
        if !self.config.enabled {
            return Ok(true);
        }
        let Some(raw) = self.store.get(&sync_key(session)).await? else {
            return Ok(true);
        };
        let interval = chrono::Duration::from_std(self.config.sync_interval)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        match serde_json::from_str::<DateTime<Utc>>(&raw) {
            Ok(at) => Ok(Utc::now() - at > interval),
            Err(e) => {
                warn!(session_id = %session.short(), error = %e, "unreadable sync time");
                Ok(true)
            }
        }
    }

    pub async fn mark_synced(&self, session: &SessionId) -> Result<(), StoreError> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = Utc::now();
        let value = serde_json::to_string(&now)?;
        self.store.set_with_expiry(&sync_key(session), &value, now + self.ttl()).await
    }

    /// Drop every cached message and the sync time of one session.
    pub async fn clear_session(&self, session: &SessionId) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in self.store.keys_with_prefix(&session_prefix(session)).await? {
            if self.store.remove(&key).await? {
                removed += 1;
            }
        }
        self.store.remove(&sync_key(session)).await?;
        debug!(session_id = %session.short(), removed, "session cache cleared");
        Ok(removed)
    }

    /// Case-insensitive keyword search over visible cached messages, in one
    /// session or all of them, newest first.
    pub async fn search(
        &self,
        session: Option<&SessionId>,
        keyword: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let prefix = match session {
            Some(s) => session_prefix(s),
            None => CACHE_PREFIX.to_string(),
        };
        let mut hits: Vec<Message> = self
            .entries(&prefix)
            .await?
            .into_iter()
            .filter(|e| !e.hidden)
            .filter(|e| {
                e.content
                    .as_ref()
                    .and_then(searchable)
                    .map_or(false, |text| text.to_lowercase().contains(&needle))
            })
            .map(CachedMessage::into_message)
            .collect();
        hits.sort_by(|a, b| b.sent_at().cmp(&a.sent_at()));
        Ok(hits)
    }

    async fn entries(&self, prefix: &str) -> Result<Vec<CachedMessage>, StoreError> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for key in self.store.keys_with_prefix(prefix).await? {
            if let Some(entry) = self.read_entry(&key).await? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    async fn read_entry(&self, key: &str) -> Result<Option<CachedMessage>, StoreError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key, error = %e, "dropping unreadable cache entry");
                self.store.remove(key).await?;
                Ok(None)
            }
        }
    }

    async fn write_entry(&self, key: &str, entry: &CachedMessage) -> Result<(), StoreError> {
        let value = serde_json::to_string(entry)?;
        self.store.set_with_expiry(key, &value, entry.cached_at + self.ttl()).await
    }
}
