//! Key derivation functions
//!
//! `hkdf_expand`: HKDF-SHA256, used to turn raw X25519 output into the
//! symmetric box key.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

const BOX_SALT: &[u8] = b"mp-chat-box-v1";
const STORAGE_SALT: &[u8] = b"mp-chat-local-store-v1";

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `salt` may be `None` (HKDF will use a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive the 32-byte symmetric key for one participant pair.
///
/// The two public keys are bound into `info` in sorted order so that the
/// sender (re-reading its own message) and the receiver derive the same key.
pub fn derive_box_key(
    shared_secret: &[u8; 32],
    pub_a: &[u8; 32],
    pub_b: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let (lo, hi) = if pub_a <= pub_b { (pub_a, pub_b) } else { (pub_b, pub_a) };
    let mut info = Vec::with_capacity(64 + 8);
    info.extend_from_slice(b"pairwise");
    info.extend_from_slice(lo);
    info.extend_from_slice(hi);

    let mut key = Zeroizing::new([0u8; 32]);
    hkdf_expand(shared_secret, Some(BOX_SALT), &info, key.as_mut())?;
    Ok(key)
}

/// Derive the at-rest key for the local store from the account secret.
pub fn derive_storage_key(account_secret: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf_expand(account_secret, Some(STORAGE_SALT), b"local-store", key.as_mut())?;
    Ok(key)
}
