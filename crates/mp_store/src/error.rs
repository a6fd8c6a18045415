use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Vault is locked, sign in first")]
    VaultLocked,

    #[error("Crypto error: {0}")]
    Crypto(#[from] mp_crypto::CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored draft could not be parsed. Logged and dropped by the draft
    /// manager, never surfaced to the composer.
    #[error("Draft for session {0} is corrupt")]
    DraftCorrupt(String),

    #[error("Cannot {action} while {state}")]
    InvalidTransition { state: &'static str, action: &'static str },

    #[error("No message ids given")]
    EmptyBatch,

    #[error("Cannot block your own account")]
    CannotBlockSelf,

    #[error("Account {0} is not a participant of this session")]
    NotParticipant(String),

    #[error(transparent)]
    Record(#[from] mp_proto::ProtoError),
}
