//! Session list and unread bookkeeping.
//!
//! Records are created lazily on first message (or when the user opens a
//! conversation) and live in the local store under `session:<id>`. Writes
//! are read-modify-write under one async lock and merged additively with
//! whatever is stored, so activity from another writer is never lost.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use mp_crypto::AccountId;
use mp_proto::{MessageMetadata, Participants, SessionId, SessionRecord};

use crate::error::StoreError;
use crate::local::{LocalStore, SESSION_PREFIX};

pub fn session_key(session: &SessionId) -> String {
    format!("{SESSION_PREFIX}{session}")
}

#[derive(Default)]
struct ViewState {
    viewing: Option<SessionId>,
}

pub struct SessionManager {
    store: Arc<dyn LocalStore>,
    view: Mutex<ViewState>,
    write: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            view: Mutex::new(ViewState::default()),
            write: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn get(&self, session: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let key = session_key(session);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(session_id = %session.short(), error = %e, "unreadable session record, starting fresh");
                Ok(None)
            }
        }
    }

    pub async fn open_or_create(
        &self,
        participants: &Participants,
    ) -> Result<SessionRecord, StoreError> {
        let _guard = self.write.lock().await;
        let id = participants.session_id();
        if let Some(record) = self.get(&id).await? {
            return Ok(record);
        }
        let record = SessionRecord::new(participants.clone(), Utc::now());
        self.save(record.clone()).await?;
        info!(session_id = %id.short(), "session created");
        Ok(record)
    }

    /// Fold one anchored message into its session.
    ///
    /// An inbound message not seen before counts as unread unless the
    /// session is on screen. Seen ids are kept in the stored record, so
    /// replays and out-of-order arrivals are counted once across restarts.
    pub async fn incorporate(
        &self,
        metadata: &MessageMetadata,
        me: &AccountId,
        preview: Option<&str>,
    ) -> Result<SessionRecord, StoreError> {
        if metadata.sender != *me && metadata.receiver != *me {
            return Err(StoreError::NotParticipant(me.short()));
        }
        let participants = Participants::new(metadata.sender.clone(), metadata.receiver.clone())?;
        let _guard = self.write.lock().await;

        let id = participants.session_id();
        let mut record = match self.get(&id).await? {
            Some(r) => r,
            None => SessionRecord::new(participants, metadata.sent_at),
        };

        if metadata.sent_at >= record.last_activity_at || record.last_preview.is_none() {
            record.last_activity_at = record.last_activity_at.max(metadata.sent_at);
            if let Some(p) = preview {
                record.last_preview = Some(p.to_string());
            }
        }

        if metadata.receiver == *me {
            let on_screen = self.view.lock().viewing.as_ref() == Some(&id);
            record.record_inbound(metadata.msg_id, !on_screen);
        }

        let record = self.save(record).await?;
        debug!(
            session_id = %id.short(),
            msg_id = metadata.msg_id,
            unread = record.unread_count(),
            "message incorporated"
        );
        Ok(record)
    }

    /// The session is on screen: everything in it is read.
    pub async fn enter_timeline(&self, session: &SessionId) -> Result<(), StoreError> {
        self.view.lock().viewing = Some(session.clone());
        let _guard = self.write.lock().await;
        if let Some(mut record) = self.get(session).await? {
            if record.mark_all_read() > 0 {
                self.save(record).await?;
            }
        }
        Ok(())
    }

    pub fn leave_timeline(&self, session: &SessionId) {
        let mut view = self.view.lock();
        if view.viewing.as_ref() == Some(session) {
            view.viewing = None;
        }
    }

    pub fn viewing(&self) -> Option<SessionId> {
        self.view.lock().viewing.clone()
    }

    /// Reads are persisted, including for messages not yet seen, so a later
    /// arrival of the same id is not counted.
    pub async fn mark_read(&self, session: &SessionId, msg_id: u64) -> Result<(), StoreError> {
        match self.mark_batch_read(session, &[msg_id]).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Mark several messages read in one write. Returns how many were unread.
    pub async fn mark_batch_read(
        &self,
        session: &SessionId,
        msg_ids: &[u64],
    ) -> Result<usize, StoreError> {
        if msg_ids.is_empty() {
            return Err(StoreError::EmptyBatch);
        }
        let _guard = self.write.lock().await;
        let Some(mut record) = self.get(session).await? else {
            return Err(StoreError::NotFound(session.short().to_string()));
        };
        let was_unread = msg_ids.iter().filter(|id| record.mark_read(**id)).count();
        self.save(record).await?;
        debug!(session_id = %session.short(), requested = msg_ids.len(), was_unread, "marked read");
        Ok(was_unread)
    }

    /// Hide one message on this side only. It stays on the ledger and with
    /// the peer; locally it is read and kept off the timeline.
    pub async fn hide_message(&self, session: &SessionId, msg_id: u64) -> Result<bool, StoreError> {
        let _guard = self.write.lock().await;
        let Some(mut record) = self.get(session).await? else {
            return Err(StoreError::NotFound(session.short().to_string()));
        };
        let newly_hidden = record.hide(msg_id);
        self.save(record).await?;
        info!(session_id = %session.short(), msg_id, "message hidden");
        Ok(newly_hidden)
    }

    pub async fn is_hidden(&self, session: &SessionId, msg_id: u64) -> Result<bool, StoreError> {
        Ok(self.get(session).await?.map_or(false, |r| r.is_hidden(msg_id)))
    }

    pub async fn unread_count(&self, session: &SessionId) -> Result<u32, StoreError> {
        Ok(self.get(session).await?.map_or(0, |r| r.unread_count()))
    }

    /// Non-archived sessions, most recent activity first.
    pub async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let mut out = Vec::new();
        for key in self.store.keys_with_prefix(SESSION_PREFIX).await? {
            let Some(id) = key.strip_prefix(SESSION_PREFIX).and_then(|s| SessionId::parse(s).ok())
            else {
                continue;
            };
            if let Some(record) = self.get(&id).await? {
                if !record.archived {
                    out.push(record);
                }
            }
        }
        out.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(out)
    }

    /// Hide a session locally; its record is kept.
    pub async fn archive(&self, session: &SessionId) -> Result<(), StoreError> {
        let _guard = self.write.lock().await;
        let mut record = self
            .get(session)
            .await?
            .ok_or_else(|| StoreError::NotFound(session.short().to_string()))?;
        record.archived = true;
        self.save(record).await?;
        info!(session_id = %session.short(), "session archived");
        Ok(())
    }

    async fn save(&self, mut record: SessionRecord) -> Result<SessionRecord, StoreError> {
        if let Some(stored) = self.get(&record.id).await? {
            record.merge(&stored);
        }
        let value = serde_json::to_string(&record)?;
        self.store.set(&session_key(&record.id), &value).await?;
        Ok(record)
    }
}
