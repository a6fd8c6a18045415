//! Ledger wire DTOs.
//!
//! These mirror the JSON shapes the ledger RPC speaks. They are only ever
//! deserialised from the untyped ledger response and immediately converted
//! into the typed model; nothing downstream of the ledger adapter sees them.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use mp_crypto::{AccountId, AccountKeyPair};

use crate::error::ProtoError;
use crate::message::{ContentRef, LedgerPosition, MessageKind, MessageMetadata};
use crate::session::SessionId;

/// Largest history page the ledger will return.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Opaque continuation for `history` queries: records strictly after
/// `after` are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageCursor {
    pub after: LedgerPosition,
}

impl PageCursor {
    pub fn after(position: LedgerPosition) -> Self {
        Self { after: position }
    }
}

// ── Submission ───────────────────────────────────────────────────────────────

/// Metadata-anchoring extrinsic, signed by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitMetadataCall {
    pub sender: String,
    pub receiver: String,
    pub session_id: String,
    pub content_cid: String,
    pub msg_type: u8,
    pub sent_at_ms: i64,
    /// Hex Ed25519 signature over `signing_bytes()`.
    pub signature: String,
}

impl SubmitMetadataCall {
    pub fn signed(
        signer: &AccountKeyPair,
        receiver: &AccountId,
        content_ref: &ContentRef,
        kind: MessageKind,
        sent_at: DateTime<Utc>,
    ) -> Self {
        let sender = signer.account_id().clone();
        let mut call = Self {
            session_id: SessionId::for_pair(&sender, receiver).to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            content_cid: content_ref.to_string(),
            msg_type: kind.code(),
            sent_at_ms: sent_at.timestamp_millis(),
            signature: String::new(),
        };
        call.signature = hex::encode(signer.sign(&call.signing_bytes()));
        call
    }

    /// `sender ‖ 0 ‖ receiver ‖ 0 ‖ cid ‖ 0 ‖ type ‖ sent_at_ms (LE)`
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.sender.len() + self.receiver.len() + self.content_cid.len() + 12,
        );
        out.extend_from_slice(self.sender.as_bytes());
        out.push(0);
        out.extend_from_slice(self.receiver.as_bytes());
        out.push(0);
        out.extend_from_slice(self.content_cid.as_bytes());
        out.push(0);
        out.push(self.msg_type);
        out.extend_from_slice(&self.sent_at_ms.to_le_bytes());
        out
    }

    pub fn verify(&self) -> bool {
        let Ok(sender) = self.sender.parse::<AccountId>() else {
            return false;
        };
        let Ok(sig) = hex::decode(&self.signature) else {
            return false;
        };
        mp_crypto::verify_signature(&self.signing_bytes(), &sig, &sender)
    }
}

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataWire {
    pub msg_id: u64,
    pub session_id: String,
    pub sender: String,
    pub receiver: String,
    pub content_cid: String,
    pub msg_type: u8,
    pub sent_at_ms: i64,
    pub block: u64,
    pub index: u32,
}

impl TryFrom<MetadataWire> for MessageMetadata {
    type Error = ProtoError;

    fn try_from(w: MetadataWire) -> Result<Self, Self::Error> {
        let sender: AccountId = w.sender.parse()?;
        let receiver: AccountId = w.receiver.parse()?;
        let session_id = SessionId::parse(&w.session_id)?;
        if session_id != SessionId::for_pair(&sender, &receiver) {
            return Err(ProtoError::MalformedRecord(format!(
                "msg {} session id does not match its participants",
                w.msg_id
            )));
        }
        let sent_at = Utc
            .timestamp_millis_opt(w.sent_at_ms)
            .single()
            .ok_or_else(|| {
                ProtoError::MalformedRecord(format!("msg {} bad timestamp {}", w.msg_id, w.sent_at_ms))
            })?;
        Ok(MessageMetadata {
            msg_id: w.msg_id,
            session_id,
            sender,
            receiver,
            content_ref: ContentRef::new(w.content_cid)?,
            kind: MessageKind::from_code(w.msg_type),
            sent_at,
            position: LedgerPosition::new(w.block, w.index),
        })
    }
}

impl From<&MessageMetadata> for MetadataWire {
    fn from(m: &MessageMetadata) -> Self {
        Self {
            msg_id: m.msg_id,
            session_id: m.session_id.to_string(),
            sender: m.sender.to_string(),
            receiver: m.receiver.to_string(),
            content_cid: m.content_ref.to_string(),
            msg_type: m.kind.code(),
            sent_at_ms: m.sent_at.timestamp_millis(),
            block: m.position.block,
            index: m.position.index,
        }
    }
}

// ── Status / pages ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxStatusWire {
    Pending,
    InBlock {
        block: u64,
    },
    Finalized {
        block: u64,
        block_hash: String,
        record: MetadataWire,
    },
    Rejected {
        /// `unauthorized`, `fee`, `invalid`, or anything else.
        kind: String,
        message: String,
    },
    /// Evicted from the pool without inclusion; outcome unknown to the caller.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HistoryPageWire {
    pub items: Vec<MetadataWire>,
    #[serde(default)]
    pub next: Option<PageCursor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResultWire {
    pub tx_hash: String,
}
