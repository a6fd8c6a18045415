//! Typed ledger boundary.
//!
//! Untyped transport JSON stops here: every response is decoded into the
//! wire DTOs and validated into `MessageMetadata` before it is returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mp_crypto::{AccountId, AccountKeyPair};
use mp_proto::ledger::{
    HistoryPageWire, MetadataWire, SubmitMetadataCall, SubmitResultWire, TxStatusWire,
    MAX_PAGE_SIZE,
};
use mp_proto::{ContentRef, LedgerPosition, MessageKind, MessageMetadata, PageCursor, Participants};
use mp_resilience::{with_retry, with_timeout, RetryConfig, Retryable};

use crate::error::{LedgerError, RejectReason};
use crate::subscription::InboundSubscription;
use crate::transport::LedgerTransport;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerAdapterConfig {
    /// Repeat submissions of the same (receiver, reference) inside this
    /// window return the original handle.
    pub dedup_window: Duration,
    pub finality_poll_interval: Duration,
    pub finality_timeout: Duration,
    pub subscription_poll_interval: Duration,
    /// Reconnect backoff for the inbound stream (only the backoff fields
    /// are used; reconnects never give up).
    pub reconnect: RetryConfig,
    pub page_size: u32,
    pub retry: RetryConfig,
}

impl Default for LedgerAdapterConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(120),
            finality_poll_interval: Duration::from_secs(1),
            finality_timeout: Duration::from_secs(60),
            subscription_poll_interval: Duration::from_secs(2),
            reconnect: RetryConfig {
                initial_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(30),
                ..RetryConfig::default()
            },
            page_size: MAX_PAGE_SIZE,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TxRef {
    Pending(String),
    /// Found already anchored while recovering from an ambiguous failure.
    Anchored(MessageMetadata),
}

/// Handle for a submitted (or recovered) metadata extrinsic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    tx: TxRef,
    pub receiver: AccountId,
    pub content_ref: ContentRef,
    /// True when this handle was served from the dedup window or recovered
    /// from an earlier attempt already on the ledger.
    pub deduplicated: bool,
}

impl TxHandle {
    pub fn tx_hash(&self) -> Option<&str> {
        match &self.tx {
            TxRef::Pending(h) => Some(h),
            TxRef::Anchored(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    pub block: u64,
    /// Unknown when the record was recovered via `find_existing`.
    pub block_hash: Option<String>,
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub items: Vec<MessageMetadata>,
    pub next_cursor: Option<PageCursor>,
}

enum Submitted {
    Pending(String),
    Existing(MessageMetadata),
}

pub struct LedgerAdapter {
    transport: Arc<dyn LedgerTransport>,
    config: LedgerAdapterConfig,
    recent: Mutex<HashMap<(AccountId, ContentRef), (TxHandle, Instant)>>,
}

impl LedgerAdapter {
    pub fn new(transport: Arc<dyn LedgerTransport>, config: LedgerAdapterConfig) -> Self {
        Self { transport, config, recent: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> &LedgerAdapterConfig {
        &self.config
    }

    /// Anchor `(sender, receiver, content_ref, kind, sent_at)`.
    ///
    /// Never double-anchors the same reference: repeats inside the dedup
    /// window reuse the original handle, and every retry after a transient
    /// failure first asks the ledger whether the record already exists.
    pub async fn submit_message_metadata(
        &self,
        signer: &AccountKeyPair,
        receiver: &AccountId,
        content_ref: &ContentRef,
        kind: MessageKind,
        sent_at: DateTime<Utc>,
    ) -> Result<TxHandle, LedgerError> {
        let key = (receiver.clone(), content_ref.clone());
        if let Some(handle) = self.recent_handle(&key) {
            info!(cid = %content_ref, "duplicate submission inside dedup window");
            return Ok(handle);
        }

        let call = SubmitMetadataCall::signed(signer, receiver, content_ref, kind, sent_at);
        let call = &call;
        let submitted = with_retry(&self.config.retry, "ledger.submit", |attempt| async move {
            if attempt > 0 {
                if let Some(existing) = self.find_existing(receiver, content_ref).await? {
                    info!(cid = %content_ref, msg_id = existing.msg_id, "already anchored, not resubmitting");
                    return Ok(Submitted::Existing(existing));
                }
            }
            let value = self.transport.submit(call).await?;
            let result: SubmitResultWire = decode(value, "submit")?;
            Ok::<_, LedgerError>(Submitted::Pending(result.tx_hash))
        })
        .await?;

        let tx = match submitted {
            Submitted::Pending(hash) => {
                debug!(tx = %hash, cid = %content_ref, "metadata submitted");
                TxRef::Pending(hash)
            }
            Submitted::Existing(m) => TxRef::Anchored(m),
        };
        let handle = TxHandle {
            tx,
            receiver: receiver.clone(),
            content_ref: content_ref.clone(),
            deduplicated: false,
        };
        self.recent.lock().insert(key, (handle.clone(), Instant::now()));
        Ok(handle)
    }

    /// Resubmit a reference whose earlier submission has an unknown outcome.
    ///
    /// Asks the ledger for the record first and only submits when it is not
    /// anchored yet. `sent_at` should be the first attempt's timestamp.
    pub async fn submit_unless_anchored(
        &self,
        signer: &AccountKeyPair,
        receiver: &AccountId,
        content_ref: &ContentRef,
        kind: MessageKind,
        sent_at: DateTime<Utc>,
    ) -> Result<TxHandle, LedgerError> {
        let key = (receiver.clone(), content_ref.clone());
        if let Some(handle) = self.recent_handle(&key) {
            return Ok(handle);
        }
        let existing = with_retry(&self.config.retry, "ledger.find_existing", |_| {
            self.find_existing(receiver, content_ref)
        })
        .await?;
        let Some(existing) = existing else {
            return self
                .submit_message_metadata(signer, receiver, content_ref, kind, sent_at)
                .await;
        };
        info!(cid = %content_ref, msg_id = existing.msg_id, "earlier attempt was anchored");
        let handle = TxHandle {
            tx: TxRef::Anchored(existing),
            receiver: receiver.clone(),
            content_ref: content_ref.clone(),
            deduplicated: true,
        };
        self.recent.lock().insert(key, (handle.clone(), Instant::now()));
        Ok(handle)
    }

    fn recent_handle(&self, key: &(AccountId, ContentRef)) -> Option<TxHandle> {
        let mut recent = self.recent.lock();
        let window = self.config.dedup_window;
        recent.retain(|_, (_, at)| at.elapsed() <= window);
        recent.get(key).map(|(h, _)| TxHandle { deduplicated: true, ..h.clone() })
    }

    fn forget(&self, handle: &TxHandle) {
        self.recent
            .lock()
            .remove(&(handle.receiver.clone(), handle.content_ref.clone()));
    }

    /// Poll until the extrinsic is finalized, rejected, dropped, or the
    /// finality timeout passes.
    pub async fn await_finality(&self, handle: &TxHandle) -> Result<Finalized, LedgerError> {
        let tx_hash = match &handle.tx {
            TxRef::Anchored(m) => {
                return Ok(Finalized {
                    block: m.position.block,
                    block_hash: None,
                    metadata: m.clone(),
                })
            }
            TxRef::Pending(h) => h.as_str(),
        };

        let timeout = self.config.finality_timeout;
        let outcome = with_timeout(timeout, self.poll_finality(tx_hash)).await;
        match outcome {
            Ok(Ok(finalized)) => {
                info!(tx = %tx_hash, block = finalized.block, msg_id = finalized.metadata.msg_id, "metadata finalized");
                Ok(finalized)
            }
            Ok(Err(e)) => {
                if matches!(e, LedgerError::Rejected { .. } | LedgerError::SubmissionTransient(_)) {
                    self.forget(handle);
                }
                Err(e)
            }
            Err(_) => {
                warn!(tx = %tx_hash, ?timeout, "finality timeout");
                Err(LedgerError::FinalityTimeout(timeout))
            }
        }
    }

    async fn poll_finality(&self, tx_hash: &str) -> Result<Finalized, LedgerError> {
        loop {
            let status = match self.transport.tx_status(tx_hash).await {
                Ok(v) => decode::<TxStatusWire>(v, "tx_status")?,
                Err(e) if e.is_retryable() => {
                    debug!(tx = %tx_hash, error = %e, "status poll failed");
                    tokio::time::sleep(self.config.finality_poll_interval).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match status {
                TxStatusWire::Pending | TxStatusWire::InBlock { .. } => {
                    tokio::time::sleep(self.config.finality_poll_interval).await;
                }
                TxStatusWire::Finalized { block, block_hash, record } => {
                    return Ok(Finalized {
                        block,
                        block_hash: Some(block_hash),
                        metadata: record.try_into()?,
                    });
                }
                TxStatusWire::Rejected { kind, message } => {
                    let reason = RejectReason::from_kind(&kind);
                    warn!(tx = %tx_hash, %reason, "metadata rejected");
                    return Err(LedgerError::Rejected { reason, message });
                }
                TxStatusWire::Dropped => {
                    return Err(LedgerError::SubmissionTransient(format!(
                        "{tx_hash} dropped from pool"
                    )));
                }
            }
        }
    }

    /// Live inbound metadata for `me`, starting with whatever is next on the
    /// ledger.
    pub fn subscribe_inbound(&self, me: AccountId) -> InboundSubscription {
        self.subscribe_inbound_from(me, None)
    }

    /// Live inbound metadata strictly after `cursor`, typically the last
    /// position returned by a history backfill.
    pub fn subscribe_inbound_from(
        &self,
        me: AccountId,
        cursor: Option<LedgerPosition>,
    ) -> InboundSubscription {
        InboundSubscription::spawn(self.transport.clone(), me, cursor, &self.config)
    }

    /// One page of a session's history, ascending in ledger order.
    pub async fn query_history(
        &self,
        participants: &Participants,
        cursor: Option<PageCursor>,
    ) -> Result<HistoryPage, LedgerError> {
        let session_id = participants.session_id();
        let limit = self.config.page_size.clamp(1, MAX_PAGE_SIZE);
        let value = with_retry(&self.config.retry, "ledger.history", |_| {
            self.transport.history(&session_id, cursor, limit)
        })
        .await?;
        let page: HistoryPageWire = decode(value, "history")?;

        let mut items = Vec::with_capacity(page.items.len());
        for wire in page.items {
            let msg_id = wire.msg_id;
            match MessageMetadata::try_from(wire) {
                Ok(m) if m.session_id == session_id => items.push(m),
                Ok(_) => warn!(msg_id, "history record for another session skipped"),
                Err(e) => warn!(msg_id, error = %e, "malformed history record skipped"),
            }
        }
        items.sort_by_key(|m| m.position);
        Ok(HistoryPage { items, next_cursor: page.next })
    }

    pub async fn find_existing(
        &self,
        receiver: &AccountId,
        content_ref: &ContentRef,
    ) -> Result<Option<MessageMetadata>, LedgerError> {
        let value = self.transport.find_by_content(receiver, content_ref).await?;
        if value.is_null() {
            return Ok(None);
        }
        let wire: MetadataWire = decode(value, "find_by_content")?;
        Ok(Some(wire.try_into()?))
    }

    pub async fn health(&self) -> bool {
        match self.transport.health().await {
            Ok(v) => !v.get("isSyncing").and_then(Value::as_bool).unwrap_or(false),
            Err(e) => {
                debug!(error = %e, "ledger health check failed");
                false
            }
        }
    }
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, LedgerError> {
    serde_json::from_value(value).map_err(|e| LedgerError::Protocol(format!("{what}: {e}")))
}
