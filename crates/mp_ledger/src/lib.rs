//! mp_ledger: Ledger metadata adapter
//!
//! Only a small metadata record (sender, receiver, content reference, kind,
//! timestamp) is anchored on the ledger. This crate submits it, waits for
//! finality, streams inbound records and pages session history.
//!
//! # Modules
//! - `transport`: `LedgerTransport` boundary (untyped JSON)
//! - `jsonrpc`: JSON-RPC 2.0 HTTP transport
//! - `memory`: in-process ledger for tests
//! - `adapter`: `LedgerAdapter`, the typed boundary
//! - `subscription`: reconnecting inbound stream
//! - `error`: ledger error taxonomy

pub mod adapter;
pub mod error;
pub mod jsonrpc;
pub mod memory;
pub mod subscription;
pub mod transport;

pub use adapter::{Finalized, HistoryPage, LedgerAdapter, LedgerAdapterConfig, TxHandle};
pub use error::{LedgerError, RejectReason};
pub use jsonrpc::JsonRpcTransport;
pub use memory::MemoryLedger;
pub use subscription::InboundSubscription;
pub use transport::LedgerTransport;
