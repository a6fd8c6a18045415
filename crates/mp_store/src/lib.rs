//! mp_store: Local state for Memopark Chat
//!
//! Drafts and session records live in a small key/value store. The SQLite
//! backend encrypts every value with a vault key derived from the signed-in
//! account, so nothing readable is left on disk after sign-out.
//!
//! # Modules
//! - `local`: `LocalStore` trait and the in-memory implementation
//! - `sqlite`: sqlx/SQLite implementation (WAL, migrations)
//! - `vault`: at-rest key held for the authenticated session
//! - `draft`: debounced, expiring per-session drafts
//! - `session`: session list, unread counts, archive, local hide
//! - `cache`: opt-in decrypted message cache with sync bookkeeping
//! - `blocklist`: locally blocked accounts
//! - `compose`: compose/send state machine
//! - `sweeper`: background removal of expired entries
//! - `error`: store error taxonomy

pub mod blocklist;
pub mod cache;
pub mod compose;
pub mod draft;
pub mod error;
pub mod local;
pub mod session;
pub mod sqlite;
pub mod sweeper;
pub mod vault;

pub use blocklist::BlockList;
pub use cache::{CacheConfig, MessageCache};
pub use compose::{ComposeState, Composer};
pub use draft::{DraftConfig, DraftManager};
pub use error::StoreError;
pub use local::{LocalStore, MemoryStore};
pub use session::SessionManager;
pub use sqlite::SqliteStore;
pub use sweeper::ExpirySweeper;
pub use vault::Vault;
