//! JSON-RPC 2.0 over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use mp_crypto::AccountId;
use mp_proto::ledger::SubmitMetadataCall;
use mp_proto::{ContentRef, LedgerPosition, PageCursor, SessionId};

use crate::error::{LedgerError, RejectReason};
use crate::transport::LedgerTransport;

/// Node error code for a transaction that failed validation.
const INVALID_TRANSACTION: i64 = 1010;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

pub struct JsonRpcTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .user_agent("mp-chat/0.1")
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Protocol(format!("http client: {e}")))?;
        Ok(Self { client, url: url.into(), next_id: AtomicU64::new(1) })
    }

    async fn call(&self, method: &str, params: Value, submitting: bool) -> Result<Value, LedgerError> {
        let transient = |msg: String| {
            if submitting {
                LedgerError::SubmissionTransient(msg)
            } else {
                LedgerError::Unavailable(msg)
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!(method, id, "ledger rpc");

        let res = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transient(format!("{method}: {e}")))?;

        let status = res.status();
        if !status.is_success() {
            return Err(transient(format!("{method}: http {status}")));
        }
        let parsed: RpcResponse = res
            .json()
            .await
            .map_err(|e| LedgerError::Protocol(format!("{method}: {e}")))?;

        if let Some(err) = parsed.error {
            let detail = match &err.data {
                Some(Value::String(s)) => format!("{}: {s}", err.message),
                Some(other) => format!("{}: {other}", err.message),
                None => err.message.clone(),
            };
            return Err(match err.code {
                INVALID_TRANSACTION => LedgerError::Rejected {
                    reason: RejectReason::classify(&detail),
                    message: detail,
                },
                -32700..=-32600 => LedgerError::Protocol(format!("{method}: {detail}")),
                _ => transient(format!("{method}: rpc error {}: {detail}", err.code)),
            });
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl LedgerTransport for JsonRpcTransport {
    async fn submit(&self, call: &SubmitMetadataCall) -> Result<Value, LedgerError> {
        self.call("chat_submitMetadata", json!([call]), true).await
    }

    async fn tx_status(&self, tx_hash: &str) -> Result<Value, LedgerError> {
        self.call("chat_txStatus", json!([tx_hash]), false).await
    }

    async fn inbound(
        &self,
        receiver: &AccountId,
        after: Option<LedgerPosition>,
        limit: u32,
    ) -> Result<Value, LedgerError> {
        self.call("chat_inboundSince", json!([receiver, after, limit]), false).await
    }

    async fn history(
        &self,
        session_id: &SessionId,
        cursor: Option<PageCursor>,
        limit: u32,
    ) -> Result<Value, LedgerError> {
        self.call("chat_sessionHistory", json!([session_id, cursor, limit]), false).await
    }

    async fn find_by_content(
        &self,
        receiver: &AccountId,
        content_ref: &ContentRef,
    ) -> Result<Value, LedgerError> {
        self.call("chat_findByContent", json!([receiver, content_ref]), false).await
    }

    async fn health(&self) -> Result<Value, LedgerError> {
        self.call("system_health", json!([]), false).await
    }
}
