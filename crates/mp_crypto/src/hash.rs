//! BLAKE3-based hash utilities
//!
//! - Integrity digests of message content (independent of transport encryption)
//! - Deterministic session ids from an unordered participant pair
//! - Content-addressing for the in-memory content store

use std::fmt;

use serde::{Deserialize, Serialize};

/// 32-byte BLAKE3 digest, hex on display and on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

pub fn hash(data: &[u8]) -> Digest {
    Digest(blake3::hash(data).into())
}

/// Order-independent digest of two identities.
///
/// `H("mp-session-v1" || min(a,b) || 0x00 || max(a,b))`
pub fn session_digest(a: &str, b: &str) -> Digest {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"mp-session-v1\x00");
    hasher.update(lo.as_bytes());
    hasher.update(b"\x00");
    hasher.update(hi.as_bytes());
    Digest(hasher.finalize().into())
}
