use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Wrong key pair or tampered ciphertext. Terminal, never retried.
    #[error("Authentication failed (tag mismatch: wrong key or tampered ciphertext)")]
    AuthenticationFailed,

    /// Corrupt or truncated envelope. Terminal, never retried.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid account identity: {0}")]
    InvalidIdentity(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl CryptoError {
    /// True for the two decryption failures the caller must be able to
    /// tell apart from everything else (and from each other).
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::MalformedEnvelope(_))
    }
}
