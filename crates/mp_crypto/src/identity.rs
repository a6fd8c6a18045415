//! Account identity and key management
//!
//! Every participant is identified on the ledger by an Ed25519 public key.
//! Its public identity encoding is `AccountId`: `0x` followed by the 64 hex
//! characters of the 32-byte key.
//!
//! Box encryption needs X25519 keys. Both halves are derived from the
//! Ed25519 material, so a sender can compute a receiver's box key from the
//! receiver's `AccountId` alone (no key directory, no network access):
//! - secret: clamped SHA-512 expansion of the Ed25519 seed (libsodium style)
//! - public: birational map of the Ed25519 point to Montgomery form

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

// ── Account identity ──────────────────────────────────────────────────────────

/// Public account identity, normalised to lowercase `0x…` hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn from_public_bytes(public: &[u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(public)))
    }

    /// Raw 32-byte Ed25519 public key.
    pub fn public_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        // Validated on construction; cannot fail.
        if let Ok(bytes) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&bytes);
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for logs: `0x1234…cdef`.
    pub fn short(&self) -> String {
        format!("{}…{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl FromStr for AccountId {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| CryptoError::InvalidIdentity("missing 0x prefix".into()))?;
        if body.len() != 64 {
            return Err(CryptoError::InvalidIdentity(format!(
                "expected 64 hex chars, got {}",
                body.len()
            )));
        }
        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CryptoError::InvalidIdentity("non-hex character".into()));
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for AccountId {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.short())
    }
}

// ── Account keypair ───────────────────────────────────────────────────────────

/// Long-term account signing key.  Drop clears memory via ZeroizeOnDrop.
#[derive(ZeroizeOnDrop)]
pub struct AccountKeyPair {
    #[zeroize(skip)]
    account: AccountId,
    secret_bytes: [u8; 32],
}

impl AccountKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let account = AccountId::from_public_bytes(&signing_key.verifying_key().to_bytes());
        Self { account, secret_bytes: signing_key.to_bytes() }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("Account key must be 32 bytes, got {}", bytes.len()))
        })?;
        let signing_key = SigningKey::from_bytes(&arr);
        let account = AccountId::from_public_bytes(&signing_key.verifying_key().to_bytes());
        Ok(Self { account, secret_bytes: arr })
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account
    }

    /// Sign arbitrary bytes; returns the 64-byte raw Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        SigningKey::from_bytes(&self.secret_bytes).sign(msg).to_bytes().to_vec()
    }

    /// X25519 secret for box key agreement.
    pub fn box_secret(&self) -> StaticSecret {
        ed25519_secret_to_x25519(&self.secret_bytes)
    }

    pub fn box_public(&self) -> X25519Public {
        X25519Public::from(&self.box_secret())
    }

    /// Key for encrypting this account's local store at rest.
    pub fn storage_key(&self) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        crate::kdf::derive_storage_key(&self.secret_bytes)
    }
}

impl fmt::Debug for AccountKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeyPair")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

// ── Key derivation from identity ──────────────────────────────────────────────

/// Deterministically derive the box public key for an account.
pub fn public_key_from_identity(account: &AccountId) -> Result<X25519Public, CryptoError> {
    ed25519_pub_to_x25519(&account.public_bytes())
}

/// Verify an Ed25519 signature made by `account`.
///
/// Malformed keys or signatures verify as `false`; this never errors.
pub fn verify_signature(message: &[u8], signature: &[u8], account: &AccountId) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(&account.public_bytes()) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    vk.verify(message, &sig).is_ok()
}

/// Convert an Ed25519 signing key (32 bytes) to an X25519 static secret.
/// Uses the clamped SHA-512 expansion that ed25519-dalek uses internally.
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    use sha2::{Digest, Sha512};
    let mut h = Sha512::digest(ed_secret);
    // Clamp as per RFC 7748 §5
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut key = [0u8; 32];
    key.copy_from_slice(&h[..32]);
    h.as_mut_slice().zeroize();
    StaticSecret::from(key)
}

/// Convert an Ed25519 verifying key (public, 32 bytes) to an X25519 public key.
pub fn ed25519_pub_to_x25519(ed_pub: &[u8; 32]) -> Result<X25519Public, CryptoError> {
    use curve25519_dalek::edwards::CompressedEdwardsY;
    let compressed = CompressedEdwardsY::from_slice(ed_pub)
        .map_err(|_| CryptoError::InvalidKey("invalid Ed25519 public key".into()))?;
    let point = compressed
        .decompress()
        .ok_or_else(|| CryptoError::InvalidKey("Ed25519 public key decompression failed".into()))?;
    Ok(X25519Public::from(point.to_montgomery().to_bytes()))
}
