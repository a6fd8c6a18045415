//! `Messenger`: the send and receive pipelines for one signed-in account.
//!
//! Send: liveness gate, encrypt for the receiver, upload, then (past the
//! cancellation point) anchor the metadata and wait for finality.
//! Receive: fetch the envelope behind an anchored reference, decrypt it,
//! and fold the result into the session list and timeline.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use mp_crypto::{public_key_from_identity, AccountId, AccountKeyPair, EncryptedEnvelope};
use mp_ipfs::{
    ContentBackend, ContentStore, GatewayRetrieval, KuboBackend, PinStatus, UploadReceipt,
};
use mp_ledger::{
    Finalized, InboundSubscription, JsonRpcTransport, LedgerAdapter, LedgerError, LedgerTransport,
    TxHandle,
};
use mp_proto::{
    decrypt_content, encrypt_content, LedgerPosition, Message, MessageContent, MessageMetadata,
    PaddingMode, Participants, SessionId, SessionRecord,
};
use mp_store::{
    BlockList, Composer, DraftManager, ExpirySweeper, LocalStore, MessageCache, SessionManager,
    SqliteStore, Vault,
};
use mp_timeline::{Timeline, TimelineConfig};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::ticket::SendTicket;

/// Result of a completed send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub metadata: MessageMetadata,
    pub block_hash: Option<String>,
    pub upload: UploadReceipt,
    /// The ledger already had this reference from an earlier attempt.
    pub deduplicated: bool,
}

impl SendOutcome {
    /// Set when the content is retrievable but not pinned.
    pub fn pin_warning(&self) -> Option<&str> {
        match &self.upload.pin {
            PinStatus::Pinned => None,
            PinStatus::Failed(reason) => Some(reason),
        }
    }
}

/// History pulled in by `backfill`.
#[derive(Debug, Clone, Default)]
pub struct Backfill {
    pub items: Vec<MessageMetadata>,
    /// Hand this to `subscribe_from` so the live stream starts after it.
    pub cursor: Option<LedgerPosition>,
}

/// A send that got past upload but has no known ledger outcome yet. Sending
/// the same content again in its session resumes it instead of uploading a
/// fresh envelope, so the message is anchored at most once.
#[derive(Clone)]
struct PendingSend {
    content: MessageContent,
    upload: UploadReceipt,
    sent_at: DateTime<Utc>,
    handle: Option<TxHandle>,
}

pub struct Messenger {
    me: AccountId,
    account: RwLock<Option<Arc<AccountKeyPair>>>,
    content: ContentStore,
    ledger: LedgerAdapter,
    store: Arc<dyn LocalStore>,
    sessions: SessionManager,
    drafts: DraftManager,
    cache: MessageCache,
    blocklist: BlockList,
    composers: tokio::sync::Mutex<HashMap<SessionId, Composer>>,
    pending_sends: Mutex<HashMap<SessionId, PendingSend>>,
    timelines: Mutex<HashMap<SessionId, Timeline>>,
    timeline_config: TimelineConfig,
    padding: PaddingMode,
    vault: Option<Vault>,
    sweeper: Mutex<Option<ExpirySweeper>>,
}

impl Messenger {
    /// Assemble from already-built adapters (tests inject in-memory fakes).
    pub fn new(
        account: AccountKeyPair,
        content: ContentStore,
        ledger: LedgerAdapter,
        store: Arc<dyn LocalStore>,
        config: &ChatConfig,
    ) -> Self {
        let me = account.account_id().clone();
        Self {
            me: me.clone(),
            account: RwLock::new(Some(Arc::new(account))),
            content,
            ledger,
            sessions: SessionManager::new(store.clone()),
            drafts: DraftManager::new(store.clone(), config.store.drafts.clone()),
            cache: MessageCache::new(store.clone(), config.store.cache.clone()),
            blocklist: BlockList::new(store.clone(), me.clone()),
            store,
            composers: tokio::sync::Mutex::new(HashMap::new()),
            pending_sends: Mutex::new(HashMap::new()),
            timelines: Mutex::new(HashMap::new()),
            timeline_config: config.timeline.clone(),
            padding: config.padding,
            vault: None,
            sweeper: Mutex::new(None),
        }
    }

    /// Build the production stack from configuration: Kubo plus gateway
    /// fallbacks, the JSON-RPC ledger, and an encrypted SQLite store
    /// unlocked for `account`. Starts the expiry sweeper.
    pub async fn connect(config: &ChatConfig, account: AccountKeyPair) -> Result<Self, ChatError> {
        let backend: Arc<dyn ContentBackend> =
            Arc::new(KuboBackend::new(&config.ipfs.api_url, config.ipfs.request_timeout)?);
        let mut content = ContentStore::new(backend, config.ipfs.content_store_config());
        for gateway in &config.ipfs.gateways {
            content = content
                .with_strategy(Arc::new(GatewayRetrieval::new(gateway, config.ipfs.strategy_timeout)?));
        }

        let transport: Arc<dyn LedgerTransport> =
            Arc::new(JsonRpcTransport::new(&config.ledger.rpc_url, config.ledger.request_timeout)?);
        let ledger = LedgerAdapter::new(transport, config.ledger.adapter.clone());

        let vault = Vault::new();
        vault.unlock_for(&account).await?;
        let store: Arc<dyn LocalStore> =
            Arc::new(SqliteStore::open(&config.store.db_path, vault.clone()).await?);

        let mut messenger = Self::new(account, content, ledger, store, config);
        messenger.vault = Some(vault);
        messenger.start_sweeper(config.store.sweep_interval);
        info!(
            account = %messenger.me.short(),
            strategies = ?messenger.content.strategy_names(),
            "messenger connected"
        );
        Ok(messenger)
    }

    pub fn start_sweeper(&self, interval: Duration) {
        let mut sweeper = ExpirySweeper::new(self.store.clone(), interval);
        sweeper.start();
        *self.sweeper.lock() = Some(sweeper);
    }

    pub fn me(&self) -> &AccountId {
        &self.me
    }

    pub fn is_signed_in(&self) -> bool {
        self.account.read().is_some()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn drafts(&self) -> &DraftManager {
        &self.drafts
    }

    pub fn ledger(&self) -> &LedgerAdapter {
        &self.ledger
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    fn signer(&self) -> Result<Arc<AccountKeyPair>, ChatError> {
        self.account.read().clone().ok_or(ChatError::SignedOut)
    }

    fn participants_with(&self, peer: &AccountId) -> Result<Participants, ChatError> {
        Ok(Participants::new(self.me.clone(), peer.clone())?)
    }

    // ── Send ────────────────────────────────────────────────────────────────

    pub async fn send(
        &self,
        receiver: &AccountId,
        content: MessageContent,
    ) -> Result<SendOutcome, ChatError> {
        self.send_with_ticket(receiver, content, &SendTicket::new()).await
    }

    /// Send `content` to `receiver`.
    ///
    /// After an ambiguous ledger failure (finality timeout, dropped or
    /// unconfirmed submission) sending the same content again in the same
    /// session resumes the earlier attempt: the uploaded envelope and its
    /// timestamp are reused and the ledger is checked before resubmitting.
    pub async fn send_with_ticket(
        &self,
        receiver: &AccountId,
        content: MessageContent,
        ticket: &SendTicket,
    ) -> Result<SendOutcome, ChatError> {
        let signer = self.signer()?;
        let participants = self.participants_with(receiver)?;
        let session = participants.session_id();
        if self.blocklist.is_blocked(receiver).await? {
            return Err(ChatError::Blocked(receiver.short()));
        }

        let resumed = {
            let pending = self.pending_sends.lock();
            match pending.get(&session) {
                Some(p) if p.content == content => Some(p.clone()),
                Some(p) => {
                    warn!(session_id = %session.short(), cid = %p.upload.reference, "unresolved send superseded by new content");
                    None
                }
                None => None,
            }
        };

        let resuming = resumed.is_some();
        let pending = match resumed {
            Some(pending) => {
                info!(session_id = %session.short(), cid = %pending.upload.reference, "resuming unresolved send");
                if !ticket.commit() {
                    return Err(ChatError::Cancelled);
                }
                pending
            }
            None => {
                if !self.content.availability_check().await {
                    warn!(session_id = %session.short(), "content network unavailable, send refused");
                    return Err(ChatError::ContentUnavailable);
                }

                let peer_public = public_key_from_identity(receiver)?;
                let envelope =
                    encrypt_content(&content, &signer.box_secret(), &peer_public, self.padding)?;
                let upload = self.content.upload(envelope.to_wire()).await?;

                if !ticket.commit() {
                    info!(session_id = %session.short(), cid = %upload.reference, "send cancelled before submission");
                    return Err(ChatError::Cancelled);
                }
                let pending =
                    PendingSend { content: content.clone(), upload, sent_at: Utc::now(), handle: None };
                self.pending_sends.lock().insert(session.clone(), pending.clone());
                pending
            }
        };

        let anchored = self.anchor(&signer, receiver, &session, &pending, resuming).await;
        let (handle, finalized) = match anchored {
            Ok(done) => {
                self.pending_sends.lock().remove(&session);
                done
            }
            Err(e) => {
                if e.is_terminal() {
                    self.pending_sends.lock().remove(&session);
                }
                return Err(e.into());
            }
        };
        let metadata = finalized.metadata;
        let upload = pending.upload;

        self.sessions.incorporate(&metadata, &self.me, Some(&content.preview())).await?;
        let message = Message { metadata: metadata.clone(), content: Some(content), read: true };
        self.remember(&message).await;
        self.with_timeline_mut(&session, |tl| {
            tl.upsert(message);
        });
        info!(
            session_id = %session.short(),
            msg_id = metadata.msg_id,
            position = %metadata.position,
            durable = upload.is_durable(),
            "message sent"
        );
        Ok(SendOutcome {
            metadata,
            block_hash: finalized.block_hash,
            upload,
            deduplicated: handle.deduplicated,
        })
    }

    /// Submit (or re-check) the pending send and wait for finality, keeping
    /// the tx handle on the pending entry while its outcome is unknown.
    async fn anchor(
        &self,
        signer: &AccountKeyPair,
        receiver: &AccountId,
        session: &SessionId,
        pending: &PendingSend,
        resuming: bool,
    ) -> Result<(TxHandle, Finalized), LedgerError> {
        let reference = &pending.upload.reference;
        let kind = pending.content.kind();
        let handle = match &pending.handle {
            Some(handle) => handle.clone(),
            None if !resuming => {
                self.ledger
                    .submit_message_metadata(signer, receiver, reference, kind, pending.sent_at)
                    .await?
            }
            None => {
                self.ledger
                    .submit_unless_anchored(signer, receiver, reference, kind, pending.sent_at)
                    .await?
            }
        };
        self.set_pending_handle(session, Some(handle.clone()));

        match self.ledger.await_finality(&handle).await {
            Ok(finalized) => Ok((handle, finalized)),
            Err(e) => {
                if matches!(e, LedgerError::SubmissionTransient(_)) {
                    // Dropped from the pool: the next attempt resubmits the same reference.
                    self.set_pending_handle(session, None);
                }
                Err(e)
            }
        }
    }

    fn set_pending_handle(&self, session: &SessionId, handle: Option<TxHandle>) {
        if let Some(p) = self.pending_sends.lock().get_mut(session) {
            p.handle = handle;
        }
    }

    /// Record a keystroke in the session's draft.
    pub async fn edit_draft(&self, session: &SessionId, text: &str) -> Result<(), ChatError> {
        let mut composers = self.composers.lock().await;
        self.composer(&mut composers, session).await?.edit(text)?;
        Ok(())
    }

    /// Send the session's current draft as a text message. The draft is
    /// cleared on success and kept on any failure or cancellation.
    pub async fn send_draft(
        &self,
        session: &SessionId,
        ticket: &SendTicket,
    ) -> Result<SendOutcome, ChatError> {
        let record = self
            .sessions
            .get(session)
            .await?
            .ok_or_else(|| ChatError::UnknownSession(session.short().to_string()))?;
        let peer = record
            .participants
            .peer_of(&self.me)
            .cloned()
            .ok_or_else(|| ChatError::UnknownSession(session.short().to_string()))?;

        let text = {
            let mut composers = self.composers.lock().await;
            self.composer(&mut composers, session).await?.begin_send().await?
        };

        let result = self.send_with_ticket(&peer, MessageContent::text(text), ticket).await;

        // The send outcome wins over any draft bookkeeping failure.
        let mut composers = self.composers.lock().await;
        if let Some(composer) = composers.get_mut(session) {
            let settled = match &result {
                Ok(_) => composer.send_succeeded().await,
                Err(ChatError::Cancelled) => composer.cancel_send().await,
                Err(e) => {
                    debug!(session_id = %session.short(), error = %e, "send failed, draft kept");
                    composer.send_failed().await
                }
            };
            if let Err(e) = settled {
                warn!(
                    session_id = %session.short(),
                    error = %e,
                    sent = result.is_ok(),
                    "draft bookkeeping after send failed"
                );
            }
        }
        result
    }

    async fn composer<'a>(
        &self,
        composers: &'a mut HashMap<SessionId, Composer>,
        session: &SessionId,
    ) -> Result<&'a mut Composer, ChatError> {
        match composers.entry(session.clone()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let composer = Composer::open(session.clone(), self.drafts.clone()).await?;
                Ok(e.insert(composer))
            }
        }
    }

    pub async fn compose_state(&self, session: &SessionId) -> Option<mp_store::ComposeState> {
        self.composers.lock().await.get(session).map(Composer::state)
    }

    // ── Receive ─────────────────────────────────────────────────────────────

    /// Fetch and decrypt one anchored message addressed to (or sent by) us.
    ///
    /// The message is placed on the timeline and counted in its session
    /// even when its content cannot be fetched or decrypted; that error is
    /// returned to the caller and not retried here.
    pub async fn receive(&self, metadata: MessageMetadata) -> Result<Message, ChatError> {
        let signer = self.signer()?;
        let session = metadata.session_id.clone();
        if !metadata.is_outgoing(&self.me) && self.blocklist.is_blocked(&metadata.sender).await? {
            debug!(msg_id = metadata.msg_id, sender = %metadata.sender.short(), "message from blocked account dropped");
            return Err(ChatError::Blocked(metadata.sender.short()));
        }
        let hidden = self.sessions.is_hidden(&session, metadata.msg_id).await?;
        if !hidden {
            self.with_timeline_mut(&session, |tl| {
                tl.insert_pending(metadata.clone());
            });
        }

        let opened = self.open_content(&signer, &metadata).await;
        let preview = opened.as_ref().ok().map(MessageContent::preview);
        self.sessions.incorporate(&metadata, &self.me, preview.as_deref()).await?;

        let content = match opened {
            Ok(c) => c,
            Err(e) => {
                warn!(msg_id = metadata.msg_id, cid = %metadata.content_ref, error = %e, "message content unavailable");
                return Err(e);
            }
        };
        let on_screen = self.sessions.viewing().as_ref() == Some(&session);
        let message = Message { metadata, content: Some(content), read: on_screen || hidden };
        self.remember(&message).await;
        if !hidden {
            self.with_timeline_mut(&session, |tl| {
                tl.upsert(message.clone());
            });
        }
        debug!(session_id = %session.short(), msg_id = message.id(), hidden, "message received");
        Ok(message)
    }

    /// Put a decrypted message in the cache. A cache failure never fails
    /// the send or receive that produced the message.
    async fn remember(&self, message: &Message) {
        if !self.cache.is_enabled() {
            return;
        }
        if let Err(e) = self.cache.cache_messages(std::slice::from_ref(message)).await {
            warn!(msg_id = message.id(), error = %e, "message not cached");
        }
    }

    async fn open_content(
        &self,
        signer: &AccountKeyPair,
        metadata: &MessageMetadata,
    ) -> Result<MessageContent, ChatError> {
        let body = self.content.download(&metadata.content_ref, None).await?;
        let envelope = EncryptedEnvelope::from_wire(&body)?;
        let peer_public = public_key_from_identity(metadata.peer_of(&self.me))?;
        Ok(decrypt_content(&envelope, &signer.box_secret(), &peer_public)?)
    }

    /// Page a session's history from the ledger into its timeline.
    pub async fn backfill(&self, peer: &AccountId) -> Result<Backfill, ChatError> {
        let participants = self.participants_with(peer)?;
        let session = participants.session_id();
        let mut out = Backfill::default();
        let mut cursor = None;
        loop {
            let page = self.ledger.query_history(&participants, cursor).await?;
            for metadata in page.items {
                let record = self.sessions.incorporate(&metadata, &self.me, None).await?;
                if !record.is_hidden(metadata.msg_id) {
                    self.with_timeline_mut(&session, |tl| {
                        tl.insert_pending(metadata.clone());
                    });
                }
                out.cursor = out.cursor.max(Some(metadata.position));
                out.items.push(metadata);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        self.cache.mark_synced(&session).await?;
        info!(session_id = %session.short(), records = out.items.len(), "history backfilled");
        Ok(out)
    }

    /// Live inbound metadata strictly after `cursor`.
    pub fn subscribe_from(&self, cursor: Option<LedgerPosition>) -> InboundSubscription {
        self.ledger.subscribe_inbound_from(self.me.clone(), cursor)
    }

    /// Take the next inbound record off `inbound` and receive it.
    pub async fn receive_next<S>(&self, inbound: &mut S) -> Option<Result<Message, ChatError>>
    where
        S: Stream<Item = MessageMetadata> + Unpin,
    {
        let metadata = inbound.next().await?;
        Some(self.receive(metadata).await)
    }

    // ── Sessions ────────────────────────────────────────────────────────────

    /// Open (creating if needed) the conversation with `peer` and put it on
    /// screen; its unread count drops to zero.
    pub async fn open_session(&self, peer: &AccountId) -> Result<SessionRecord, ChatError> {
        let participants = self.participants_with(peer)?;
        let record = self.sessions.open_or_create(&participants).await?;
        self.sessions.enter_timeline(&record.id).await?;
        self.with_timeline_mut(&record.id, Timeline::mark_all_read);
        Ok(self.sessions.get(&record.id).await?.unwrap_or(record))
    }

    /// Navigate away: stop treating the session as on screen and persist
    /// any pending draft.
    pub async fn close_session(&self, session: &SessionId) -> Result<(), ChatError> {
        self.sessions.leave_timeline(session);
        self.drafts.flush(session).await?;
        Ok(())
    }

    pub async fn mark_read(&self, session: &SessionId, msg_id: u64) -> Result<(), ChatError> {
        self.sessions.mark_read(session, msg_id).await?;
        self.cache.mark_read(session, msg_id).await?;
        self.with_timeline_mut(session, |tl| {
            tl.mark_read(msg_id);
        });
        Ok(())
    }

    /// Mark several messages read at once. Returns how many were unread.
    pub async fn mark_batch_read(
        &self,
        session: &SessionId,
        msg_ids: &[u64],
    ) -> Result<usize, ChatError> {
        let was_unread = self.sessions.mark_batch_read(session, msg_ids).await?;
        for id in msg_ids {
            self.cache.mark_read(session, *id).await?;
        }
        self.with_timeline_mut(session, |tl| {
            for id in msg_ids {
                tl.mark_read(*id);
            }
        });
        Ok(was_unread)
    }

    /// Hide one message on this device. The ledger record and the peer's
    /// copy are untouched; backfill and the inbound stream skip it here.
    pub async fn hide_message(&self, session: &SessionId, msg_id: u64) -> Result<(), ChatError> {
        self.sessions.hide_message(session, msg_id).await?;
        self.cache.hide(session, msg_id).await?;
        self.with_timeline_mut(session, |tl| {
            tl.remove(msg_id);
        });
        Ok(())
    }

    pub async fn unread_count(&self, session: &SessionId) -> Result<u32, ChatError> {
        Ok(self.sessions.unread_count(session).await?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, ChatError> {
        Ok(self.sessions.list().await?)
    }

    pub async fn archive_session(&self, session: &SessionId) -> Result<(), ChatError> {
        Ok(self.sessions.archive(session).await?)
    }

    /// Fill the session's timeline from the local cache, e.g. before the
    /// first backfill after a restart. Returns how many messages were added.
    pub async fn restore_cached(&self, session: &SessionId) -> Result<usize, ChatError> {
        let cached = self.cache.cached_messages(session).await?;
        Ok(self.with_timeline_mut(session, |tl| {
            cached.into_iter().map(|m| tl.upsert(m)).filter(|added| *added).count()
        }))
    }

    /// Whether `backfill` should ask the ledger again for this session.
    pub async fn needs_sync(&self, session: &SessionId) -> Result<bool, ChatError> {
        Ok(self.cache.needs_sync(session).await?)
    }

    pub async fn search_cached(
        &self,
        session: Option<&SessionId>,
        keyword: &str,
    ) -> Result<Vec<Message>, ChatError> {
        Ok(self.cache.search(session, keyword).await?)
    }

    // ── Blocking ────────────────────────────────────────────────────────────

    pub async fn block(&self, account: &AccountId) -> Result<(), ChatError> {
        Ok(self.blocklist.block(account).await?)
    }

    pub async fn unblock(&self, account: &AccountId) -> Result<bool, ChatError> {
        Ok(self.blocklist.unblock(account).await?)
    }

    pub async fn is_blocked(&self, account: &AccountId) -> Result<bool, ChatError> {
        Ok(self.blocklist.is_blocked(account).await?)
    }

    /// Read access to a session's timeline, if one exists.
    pub fn with_timeline<R>(&self, session: &SessionId, f: impl FnOnce(&Timeline) -> R) -> Option<R> {
        self.timelines.lock().get(session).map(f)
    }

    fn with_timeline_mut<R>(&self, session: &SessionId, f: impl FnOnce(&mut Timeline) -> R) -> R {
        let mut timelines = self.timelines.lock();
        let timeline = timelines
            .entry(session.clone())
            .or_insert_with(|| Timeline::new(&self.timeline_config));
        f(timeline)
    }

    // ── Sign-out ────────────────────────────────────────────────────────────

    /// Flush drafts, drop the account key, lock the local store and stop
    /// background work. Every later crypto operation fails with `SignedOut`.
    pub async fn sign_out(&self) -> Result<(), ChatError> {
        let flushed = self.drafts.flush_all().await;
        self.account.write().take();
        if let Some(vault) = &self.vault {
            vault.lock().await;
        }
        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        self.timelines.lock().clear();
        self.pending_sends.lock().clear();
        info!(account = %self.me.short(), "signed out");
        flushed.map_err(ChatError::from)
    }
}
