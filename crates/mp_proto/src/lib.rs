//! mp_proto: Data model and wire types for Memopark Chat
//!
//! Everything that crosses a boundary (ledger, content store, local store)
//! is defined here with explicit serde shapes and validated on the way in.
//!
//! # Modules
//! - `message`: anchored metadata, decrypted content, local projection
//! - `session`: participant pairs, session ids, session and draft records
//! - `ledger`: ledger wire DTOs and their conversion into typed records
//! - `codec`: padding + box encryption of `MessageContent`
//! - `error`: validation errors

pub mod codec;
pub mod error;
pub mod ledger;
pub mod message;
pub mod session;

pub use codec::{decrypt_content, encrypt_content, CodecError, PaddingMode};
pub use error::ProtoError;
pub use ledger::PageCursor;
pub use message::{
    ContentRef, LedgerPosition, Message, MessageContent, MessageKind, MessageMetadata,
};
pub use session::{DraftRecord, Participants, SessionId, SessionRecord};

pub use mp_crypto::AccountId;
