//! mp_crypto: Memopark Chat cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Pure and synchronous: nothing in this crate performs I/O.
//!
//! # Module layout
//! - `identity`: Ed25519 account keys, `AccountId` encoding, X25519 conversion
//! - `seal`: pairwise authenticated box (X25519 + HKDF + XChaCha20-Poly1305)
//! - `envelope`: `nonce ‖ ciphertext` wire unit, hex encoded
//! - `aead`: XChaCha20-Poly1305 encrypt/decrypt helpers
//! - `kdf`: HKDF-SHA256 key derivation
//! - `hash`: BLAKE3 digests (session ids, content fingerprints)
//! - `error`: unified error type

pub mod aead;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod identity;
pub mod kdf;
pub mod seal;

pub use envelope::EncryptedEnvelope;
pub use error::CryptoError;
pub use hash::{hash, session_digest, Digest};
pub use identity::{public_key_from_identity, verify_signature, AccountId, AccountKeyPair};
pub use seal::{open, open_hex, seal};

/// X25519 public key used as the box recipient.
pub type BoxPublicKey = x25519_dalek::PublicKey;

/// X25519 static secret used for box key agreement.
pub type BoxSecretKey = x25519_dalek::StaticSecret;
