//! mp_chat: Encrypted 1:1 messaging over a ledger and a content store
//!
//! Message bodies are sealed for the receiver and stored behind a content
//! reference; only a small signed metadata record is anchored on the
//! ledger. `Messenger` ties the adapters together for one signed-in
//! account.
//!
//! # Modules
//! - `messenger`: send/receive pipelines, sessions, drafts, sign-out
//! - `ticket`: send cancellation handle
//! - `config`: `ChatConfig` and its `MP_*` environment overlay
//! - `logging`: tracing subscriber setup
//! - `error`: pipeline error taxonomy

pub mod config;
pub mod error;
pub mod logging;
pub mod messenger;
pub mod ticket;

pub use config::{ChatConfig, IpfsConfig, LedgerConfig, LoggingConfig, StoreConfig};
pub use error::ChatError;
pub use logging::init_tracing;
pub use messenger::{Backfill, Messenger, SendOutcome};
pub use ticket::SendTicket;
