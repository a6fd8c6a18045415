use thiserror::Error;

use mp_crypto::CryptoError;
use mp_ipfs::ContentError;
use mp_ledger::LedgerError;
use mp_proto::{CodecError, ProtoError};
use mp_store::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The account key was dropped at sign-out.
    #[error("Signed out")]
    SignedOut,

    /// The content network failed its liveness probe; nothing was uploaded.
    #[error("Content network unavailable")]
    ContentUnavailable,

    #[error("Send cancelled before ledger submission")]
    Cancelled,

    #[error("Account {0} is blocked")]
    Blocked(String),

    #[error("Unknown session {0}")]
    UnknownSession(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Content store error: {0}")]
    Content(#[from] ContentError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid record: {0}")]
    Record(#[from] ProtoError),
}

impl ChatError {
    /// Wrong key, tampered or truncated envelope. Never retried.
    pub fn is_decryption_failure(&self) -> bool {
        match self {
            Self::Codec(CodecError::Crypto(e)) | Self::Crypto(e) => e.is_decryption_failure(),
            _ => false,
        }
    }

    /// Worth trying again later with the same input.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ContentUnavailable => true,
            Self::Content(e) => !e.is_terminal(),
            Self::Ledger(e) => !e.is_terminal(),
            _ => false,
        }
    }
}
