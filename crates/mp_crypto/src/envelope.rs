//! Encrypted envelope, the only thing the content store ever sees.
//!
//! Wire format (single string body behind a content reference):
//!
//!   hex( nonce[24] ‖ ciphertext + tag[16] )

use std::fmt;

use crate::aead::{NONCE_LEN, TAG_LEN};
use crate::error::CryptoError;

#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope(Vec<u8>);

impl EncryptedEnvelope {
    /// Wrap raw `nonce ‖ ciphertext` bytes, checking the minimum length.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedEnvelope(format!(
                "{} bytes is shorter than nonce + tag ({})",
                bytes.len(),
                NONCE_LEN + TAG_LEN
            )));
        }
        Ok(Self(bytes))
    }

    /// Parse the hex wire form. Surrounding whitespace is tolerated.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(body)
            .map_err(|e| CryptoError::MalformedEnvelope(format!("hex decode: {e}")))?;
        Self::from_bytes(bytes)
    }

    /// Parse the body fetched from the content store.
    pub fn from_wire(body: &[u8]) -> Result<Self, CryptoError> {
        let text = std::str::from_utf8(body)
            .map_err(|_| CryptoError::MalformedEnvelope("body is not UTF-8 hex".into()))?;
        Self::from_hex(text)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Bytes uploaded to the content store.
    pub fn to_wire(&self) -> Vec<u8> {
        self.to_hex().into_bytes()
    }

    pub fn nonce(&self) -> &[u8] {
        &self.0[..NONCE_LEN]
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.0[NONCE_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn from_sealed(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for EncryptedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EncryptedEnvelope {{ nonce: {}, ciphertext_len: {} }}",
            hex::encode(self.nonce()),
            self.ciphertext().len()
        )
    }
}
