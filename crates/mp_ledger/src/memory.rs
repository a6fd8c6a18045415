//! In-process ledger speaking the same JSON shapes as the RPC node.
//!
//! Every accepted submission is included in its own block. Blocks finalize
//! immediately unless `set_auto_finalize(false)`; non-final records are
//! visible to `find_by_content` but not to `inbound` or `history`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use mp_crypto::{hash, AccountId};
use mp_proto::ledger::{
    HistoryPageWire, MetadataWire, SubmitMetadataCall, SubmitResultWire, TxStatusWire,
};
use mp_proto::{ContentRef, LedgerPosition, PageCursor, SessionId};

use crate::error::LedgerError;
use crate::transport::LedgerTransport;

struct Anchored {
    wire: MetadataWire,
    finalized: bool,
}

#[derive(Default)]
struct State {
    best_block: u64,
    next_msg_id: u64,
    records: Vec<Anchored>,
    txs: HashMap<String, TxEntry>,
    auto_finalize: bool,
    reject_next: Option<(String, String)>,
    failing_submits: u32,
    ambiguous_submits: u32,
    failing_queries: u32,
    offline: bool,
}

enum TxEntry {
    Included { record: usize },
    Rejected { kind: String, message: String },
    Dropped,
}

pub struct MemoryLedger {
    state: Mutex<State>,
    submit_calls: AtomicU32,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { auto_finalize: true, next_msg_id: 1, ..State::default() }),
            submit_calls: AtomicU32::new(0),
        }
    }

    pub fn set_auto_finalize(&self, on: bool) {
        self.state.lock().auto_finalize = on;
    }

    /// Finalize every included record.
    pub fn finalize_all(&self) {
        for r in self.state.lock().records.iter_mut() {
            r.finalized = true;
        }
    }

    /// The next submission is rejected with the given status `kind`.
    pub fn reject_next(&self, kind: &str, message: &str) {
        self.state.lock().reject_next = Some((kind.to_string(), message.to_string()));
    }

    /// The next `n` submissions fail before reaching the ledger.
    pub fn fail_next_submits(&self, n: u32) {
        self.state.lock().failing_submits = n;
    }

    /// The next `n` submissions ARE anchored, but the caller sees a transient
    /// error (e.g. a timeout after the node accepted the extrinsic).
    pub fn ambiguous_next_submits(&self, n: u32) {
        self.state.lock().ambiguous_submits = n;
    }

    /// The next `n` read queries (`inbound`, `history`, `tx_status`) fail.
    pub fn fail_next_queries(&self, n: u32) {
        self.state.lock().failing_queries = n;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Evict a pending tx from the pool without inclusion.
    pub fn drop_tx(&self, tx_hash: &str) {
        if let Some(entry) = self.state.lock().txs.get_mut(tx_hash) {
            *entry = TxEntry::Dropped;
        }
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// Number of anchored records (final or not).
    pub fn anchored_count(&self) -> usize {
        self.state.lock().records.len()
    }

    fn check_query(&self) -> Result<(), LedgerError> {
        let mut s = self.state.lock();
        if s.offline {
            return Err(LedgerError::Unavailable("memory ledger offline".into()));
        }
        if s.failing_queries > 0 {
            s.failing_queries -= 1;
            return Err(LedgerError::Unavailable("injected query failure".into()));
        }
        Ok(())
    }

    fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, LedgerError> {
        serde_json::to_value(v).map_err(|e| LedgerError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl LedgerTransport for MemoryLedger {
    async fn submit(&self, call: &SubmitMetadataCall) -> Result<Value, LedgerError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let mut s = self.state.lock();
        if s.offline {
            return Err(LedgerError::SubmissionTransient("memory ledger offline".into()));
        }
        if s.failing_submits > 0 {
            s.failing_submits -= 1;
            return Err(LedgerError::SubmissionTransient("injected submit failure".into()));
        }

        let tx_hash = format!("0x{}", hash(call.signature.as_bytes()).to_hex());

        let rejection = if let Some(r) = s.reject_next.take() {
            Some(r)
        } else if !call.verify() {
            Some(("unauthorized".to_string(), "bad signature".to_string()))
        } else if ContentRef::new(call.content_cid.clone()).is_err() {
            Some(("invalid".to_string(), "content reference rejected".to_string()))
        } else {
            None
        };
        if let Some((kind, message)) = rejection {
            s.txs.insert(tx_hash.clone(), TxEntry::Rejected { kind, message });
            return Self::to_value(&SubmitResultWire { tx_hash });
        }

        s.best_block += 1;
        let msg_id = s.next_msg_id;
        s.next_msg_id += 1;
        let wire = MetadataWire {
            msg_id,
            session_id: call.session_id.clone(),
            sender: call.sender.clone(),
            receiver: call.receiver.clone(),
            content_cid: call.content_cid.clone(),
            msg_type: call.msg_type,
            sent_at_ms: call.sent_at_ms,
            block: s.best_block,
            index: 0,
        };
        let finalized = s.auto_finalize;
        s.records.push(Anchored { wire, finalized });
        let record = s.records.len() - 1;
        s.txs.insert(tx_hash.clone(), TxEntry::Included { record });

        if s.ambiguous_submits > 0 {
            s.ambiguous_submits -= 1;
            return Err(LedgerError::SubmissionTransient("timed out awaiting node reply".into()));
        }
        Self::to_value(&SubmitResultWire { tx_hash })
    }

    async fn tx_status(&self, tx_hash: &str) -> Result<Value, LedgerError> {
        self.check_query()?;
        let s = self.state.lock();
        let status = match s.txs.get(tx_hash) {
            None => TxStatusWire::Dropped,
            Some(TxEntry::Dropped) => TxStatusWire::Dropped,
            Some(TxEntry::Rejected { kind, message }) => TxStatusWire::Rejected {
                kind: kind.clone(),
                message: message.clone(),
            },
            Some(TxEntry::Included { record }) => {
                let r = &s.records[*record];
                if r.finalized {
                    TxStatusWire::Finalized {
                        block: r.wire.block,
                        block_hash: format!("0x{}", hash(&r.wire.block.to_le_bytes()).to_hex()),
                        record: r.wire.clone(),
                    }
                } else {
                    TxStatusWire::InBlock { block: r.wire.block }
                }
            }
        };
        Self::to_value(&status)
    }

    async fn inbound(
        &self,
        receiver: &AccountId,
        after: Option<LedgerPosition>,
        limit: u32,
    ) -> Result<Value, LedgerError> {
        self.check_query()?;
        let s = self.state.lock();
        let items: Vec<&MetadataWire> = s
            .records
            .iter()
            .filter(|r| r.finalized && r.wire.receiver == receiver.as_str())
            .map(|r| &r.wire)
            .filter(|w| after.map_or(true, |a| LedgerPosition::new(w.block, w.index) > a))
            .take(limit as usize)
            .collect();
        Self::to_value(&items)
    }

    async fn history(
        &self,
        session_id: &SessionId,
        cursor: Option<PageCursor>,
        limit: u32,
    ) -> Result<Value, LedgerError> {
        self.check_query()?;
        let s = self.state.lock();
        let mut matching = s
            .records
            .iter()
            .filter(|r| r.finalized && r.wire.session_id == session_id.as_str())
            .map(|r| &r.wire)
            .filter(|w| {
                cursor.map_or(true, |c| LedgerPosition::new(w.block, w.index) > c.after)
            });
        let items: Vec<MetadataWire> = matching.by_ref().take(limit as usize).cloned().collect();
        let next = match (matching.next(), items.last()) {
            (Some(_), Some(last)) => {
                Some(PageCursor::after(LedgerPosition::new(last.block, last.index)))
            }
            _ => None,
        };
        Self::to_value(&HistoryPageWire { items, next })
    }

    async fn find_by_content(
        &self,
        receiver: &AccountId,
        content_ref: &ContentRef,
    ) -> Result<Value, LedgerError> {
        self.check_query()?;
        let s = self.state.lock();
        match s.records.iter().find(|r| {
            r.wire.receiver == receiver.as_str() && r.wire.content_cid == content_ref.as_str()
        }) {
            Some(r) => Self::to_value(&r.wire),
            None => Ok(Value::Null),
        }
    }

    async fn health(&self) -> Result<Value, LedgerError> {
        if self.state.lock().offline {
            return Err(LedgerError::Unavailable("memory ledger offline".into()));
        }
        Ok(json!({ "peers": 1, "isSyncing": false, "shouldHavePeers": false }))
    }
}
