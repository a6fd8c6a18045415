//! Per-session drafts.
//!
//! Edits land in memory immediately and reach the store after a quiet
//! period; every new edit restarts it. Navigation away and shutdown call
//! `flush` so nothing typed is lost. Stored drafts expire after the TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mp_proto::{DraftRecord, SessionId};

use crate::error::StoreError;
use crate::local::{LocalStore, DRAFT_PREFIX};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    pub ttl: Duration,
    pub debounce: Duration,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            debounce: Duration::from_millis(500),
        }
    }
}

pub fn draft_key(session: &SessionId) -> String {
    format!("{DRAFT_PREFIX}{session}")
}

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct DraftState {
    texts: HashMap<SessionId, String>,
    pending: HashMap<SessionId, Pending>,
    generation: u64,
}

struct Shared {
    store: Arc<dyn LocalStore>,
    config: DraftConfig,
    state: Mutex<DraftState>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DraftManager {
    shared: Arc<Shared>,
}

impl DraftManager {
    pub fn new(store: Arc<dyn LocalStore>, config: DraftConfig) -> Self {
        Self {
            shared: Arc::new(Shared { store, config, state: Mutex::new(DraftState::default()) }),
        }
    }

    /// Record an edit and (re)start the quiet period before it is persisted.
    /// Must be called from within a tokio runtime.
    pub fn edit(&self, session: &SessionId, text: impl Into<String>) {
        let mut state = self.shared.state.lock();
        state.texts.insert(session.clone(), text.into());
        if let Some(old) = state.pending.remove(session) {
            old.task.abort();
        }
        state.generation += 1;
        let generation = state.generation;
        let task = tokio::spawn(self.shared.clone().persist_after_quiet(session.clone(), generation));
        state.pending.insert(session.clone(), Pending { generation, task });
    }

    /// The in-memory draft if there is one, else the stored draft.
    pub async fn current(&self, session: &SessionId) -> Result<Option<String>, StoreError> {
        if let Some(text) = self.shared.state.lock().texts.get(session) {
            return Ok(Some(text.clone()).filter(|t| !t.is_empty()));
        }
        let loaded = self.load(session).await?;
        if let Some(text) = &loaded {
            self.shared.state.lock().texts.entry(session.clone()).or_insert_with(|| text.clone());
        }
        Ok(loaded)
    }

    pub fn has_pending(&self, session: &SessionId) -> bool {
        self.shared.state.lock().pending.contains_key(session)
    }

    /// Persist a pending edit now.
    pub async fn flush(&self, session: &SessionId) -> Result<(), StoreError> {
        let text = {
            let mut state = self.shared.state.lock();
            match state.pending.remove(session) {
                Some(p) => {
                    p.task.abort();
                    state.texts.get(session).cloned().unwrap_or_default()
                }
                None => return Ok(()),
            }
        };
        self.shared.persist(session, &text).await
    }

    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let sessions: Vec<SessionId> = self.shared.state.lock().pending.keys().cloned().collect();
        for session in sessions {
            self.flush(&session).await?;
        }
        Ok(())
    }

    /// Stored draft text, if saved within the TTL.
    ///
    /// Expired drafts are removed, including when the store already reads
    /// them as absent. Drafts that cannot be read back are logged, removed,
    /// and treated as absent.
    pub async fn load(&self, session: &SessionId) -> Result<Option<String>, StoreError> {
        let key = draft_key(session);
        let raw = match self.shared.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                if self.shared.store.remove(&key).await? {
                    debug!(session_id = %session.short(), "expired draft removed");
                }
                return Ok(None);
            }
            Err(StoreError::Crypto(e)) => return self.drop_corrupt(session, &key, &e).await,
            Err(e) => return Err(e),
        };

        let record: DraftRecord = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => return self.drop_corrupt(session, &key, &e).await,
        };
        let ttl = chrono::Duration::from_std(self.shared.config.ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        if record.is_expired(ttl, Utc::now()) {
            debug!(session_id = %session.short(), saved_at = %record.saved_at, "draft expired");
            self.shared.store.remove(&key).await?;
            return Ok(None);
        }
        Ok(Some(record.text))
    }

    async fn drop_corrupt(
        &self,
        session: &SessionId,
        key: &str,
        cause: &(dyn std::fmt::Display + Sync),
    ) -> Result<Option<String>, StoreError> {
        let err = StoreError::DraftCorrupt(session.short().to_string());
        warn!(error = %err, cause = %cause, "discarding unreadable draft");
        self.shared.store.remove(key).await?;
        Ok(None)
    }

    /// Forget the draft after a successful send.
    pub async fn clear(&self, session: &SessionId) -> Result<(), StoreError> {
        {
            let mut state = self.shared.state.lock();
            if let Some(p) = state.pending.remove(session) {
                p.task.abort();
            }
            state.texts.remove(session);
        }
        self.shared.store.remove(&draft_key(session)).await?;
        Ok(())
    }

    /// Put text back after a failed or cancelled send, persisted immediately.
    pub async fn restore(&self, session: &SessionId, text: &str) -> Result<(), StoreError> {
        {
            let mut state = self.shared.state.lock();
            if let Some(p) = state.pending.remove(session) {
                p.task.abort();
            }
            state.texts.insert(session.clone(), text.to_string());
        }
        self.shared.persist(session, text).await
    }
}

impl Shared {
    async fn persist_after_quiet(self: Arc<Self>, session: SessionId, generation: u64) {
        tokio::time::sleep(self.config.debounce).await;
        let text = {
            let mut state = self.state.lock();
            match state.pending.get(&session) {
                Some(p) if p.generation == generation => {
                    state.pending.remove(&session);
                    state.texts.get(&session).cloned().unwrap_or_default()
                }
                _ => return,
            }
        };
        if let Err(e) = self.persist(&session, &text).await {
            warn!(session_id = %session.short(), error = %e, "draft write failed");
        }
    }

    async fn persist(&self, session: &SessionId, text: &str) -> Result<(), StoreError> {
        let key = draft_key(session);
        if text.is_empty() {
            self.store.remove(&key).await?;
            return Ok(());
        }
        let record = DraftRecord {
            session_id: session.clone(),
            text: text.to_string(),
            saved_at: Utc::now(),
        };
        let ttl = chrono::Duration::from_std(self.config.ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let value = serde_json::to_string(&record)?;
        self.store.set_with_expiry(&key, &value, record.saved_at + ttl).await?;
        debug!(session_id = %session.short(), chars = text.chars().count(), "draft saved");
        Ok(())
    }
}
