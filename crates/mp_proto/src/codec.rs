//! Content codec: `MessageContent` → padded plaintext → sealed envelope.
//!
//! # Padding
//! The plaintext is padded to a fixed size bucket INSIDE the box, so the
//! content store only ever sees a handful of distinct blob sizes.
//!
//! Bucket sizes (bytes): 256, 512, 1024, 4096, 16384, 65536
//! Payloads larger than the last bucket are sent unpadded.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use mp_crypto::{open, seal, BoxPublicKey, BoxSecretKey, CryptoError, EncryptedEnvelope};

use crate::message::MessageContent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaddingMode {
    /// Length prefix only.
    None,
    #[default]
    Buckets,
    /// Everything padded to the largest bucket.
    Maximum,
}

const BUCKET_SIZES: &[usize] = &[256, 512, 1024, 4096, 16384, 65536];
const MAX_BUCKET: usize = 65536;
const LEN_PREFIX: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid padding: {0}")]
    InvalidPadding(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CodecError {
    /// Tag mismatch: wrong key pair or tampered ciphertext.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::AuthenticationFailed))
    }
}

/// `[len: u32 LE] [plaintext] [random fill up to the bucket]`
pub fn pad(plaintext: &[u8], mode: PaddingMode) -> Vec<u8> {
    let needed = LEN_PREFIX + plaintext.len();
    let target = match mode {
        PaddingMode::None => needed,
        PaddingMode::Buckets => BUCKET_SIZES
            .iter()
            .copied()
            .find(|&b| b >= needed)
            .unwrap_or(needed),
        PaddingMode::Maximum => needed.max(MAX_BUCKET),
    };

    let mut out = Vec::with_capacity(target);
    out.extend_from_slice(&(plaintext.len() as u32).to_le_bytes());
    out.extend_from_slice(plaintext);
    let remaining = target - out.len();
    if remaining > 0 {
        // Random rather than zero fill so the plaintext does not compress.
        let mut fill = vec![0u8; remaining];
        rand::rngs::OsRng.fill_bytes(&mut fill);
        out.extend_from_slice(&fill);
    }
    out
}

pub fn unpad(padded: &[u8]) -> Result<&[u8], CodecError> {
    if padded.len() < LEN_PREFIX {
        return Err(CodecError::InvalidPadding("too short for length prefix".into()));
    }
    let len = u32::from_le_bytes([padded[0], padded[1], padded[2], padded[3]]) as usize;
    let end = LEN_PREFIX
        .checked_add(len)
        .filter(|&end| end <= padded.len())
        .ok_or_else(|| {
            CodecError::InvalidPadding(format!(
                "length prefix {len} exceeds padded size {}",
                padded.len()
            ))
        })?;
    Ok(&padded[LEN_PREFIX..end])
}

/// Serialise, pad and seal `content` for `peer_public`.
pub fn encrypt_content(
    content: &MessageContent,
    my_secret: &BoxSecretKey,
    peer_public: &BoxPublicKey,
    mode: PaddingMode,
) -> Result<EncryptedEnvelope, CodecError> {
    let json = content
        .to_canonical_bytes()
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    let padded = zeroize::Zeroizing::new(pad(&json, mode));
    Ok(seal(&padded, my_secret, peer_public)?)
}

/// Open an envelope exchanged with `peer_public` and decode its content.
pub fn decrypt_content(
    envelope: &EncryptedEnvelope,
    my_secret: &BoxSecretKey,
    peer_public: &BoxPublicKey,
) -> Result<MessageContent, CodecError> {
    let padded = open(envelope, my_secret, peer_public)?;
    let json = unpad(&padded)?;
    serde_json::from_slice(json).map_err(|e| CodecError::Serialization(e.to_string()))
}
