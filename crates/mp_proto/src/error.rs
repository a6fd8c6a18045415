use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Invalid content reference: {0}")]
    InvalidContentRef(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("Malformed ledger record: {0}")]
    MalformedRecord(String),

    #[error("Identity error: {0}")]
    Identity(#[from] mp_crypto::CryptoError),
}
