use async_trait::async_trait;
use serde_json::Value;

use mp_crypto::AccountId;
use mp_proto::ledger::SubmitMetadataCall;
use mp_proto::{ContentRef, LedgerPosition, PageCursor, SessionId};

use crate::error::LedgerError;

/// The external ledger client. Responses are loosely typed JSON, exactly as
/// the node returns them; `LedgerAdapter` is the only consumer and turns them
/// into typed records.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// `{"tx_hash": "0x…"}`
    async fn submit(&self, call: &SubmitMetadataCall) -> Result<Value, LedgerError>;

    /// A `TxStatusWire` object.
    async fn tx_status(&self, tx_hash: &str) -> Result<Value, LedgerError>;

    /// Array of finalized `MetadataWire` addressed to `receiver`, strictly
    /// after `after`, ascending.
    async fn inbound(
        &self,
        receiver: &AccountId,
        after: Option<LedgerPosition>,
        limit: u32,
    ) -> Result<Value, LedgerError>;

    /// A `HistoryPageWire` object.
    async fn history(
        &self,
        session_id: &SessionId,
        cursor: Option<PageCursor>,
        limit: u32,
    ) -> Result<Value, LedgerError>;

    /// A `MetadataWire` object, or `null`.
    async fn find_by_content(
        &self,
        receiver: &AccountId,
        content_ref: &ContentRef,
    ) -> Result<Value, LedgerError>;

    /// `{"peers": n, "isSyncing": bool, "shouldHavePeers": bool}`
    async fn health(&self) -> Result<Value, LedgerError>;
}
