//! Pairwise authenticated box.
//!
//!   ss  = X25519(my_secret, peer_public)
//!   key = HKDF-SHA256(salt = "mp-chat-box-v1", ikm = ss, info = sort(pub_me, pub_peer))
//!   env = nonce[24] ‖ XChaCha20-Poly1305(key, nonce, plaintext, aad)
//!
//! Both directions of a pair derive the same key, so the receiver opens with
//! (receiver secret, sender public) and the sender re-reads its own message
//! with (sender secret, receiver public). Any other key pair fails the tag
//! check and yields `AuthenticationFailed`, never a wrong plaintext.

use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::{aead, envelope::EncryptedEnvelope, error::CryptoError, kdf};

const ENVELOPE_AAD: &[u8] = b"mp-chat-envelope-v1";

fn pair_key(
    my_secret: &StaticSecret,
    peer_public: &X25519Public,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let shared = my_secret.diffie_hellman(peer_public);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("non-contributory X25519 public key".into()));
    }
    let my_public = X25519Public::from(my_secret);
    kdf::derive_box_key(shared.as_bytes(), my_public.as_bytes(), peer_public.as_bytes())
}

/// Encrypt `plaintext` for `peer_public` under a fresh random nonce.
pub fn seal(
    plaintext: &[u8],
    my_secret: &StaticSecret,
    peer_public: &X25519Public,
) -> Result<EncryptedEnvelope, CryptoError> {
    let key = pair_key(my_secret, peer_public)?;
    let bytes = aead::encrypt(&key, plaintext, ENVELOPE_AAD)?;
    Ok(EncryptedEnvelope::from_sealed(bytes))
}

/// Decrypt an envelope exchanged with `peer_public`.
pub fn open(
    envelope: &EncryptedEnvelope,
    my_secret: &StaticSecret,
    peer_public: &X25519Public,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let key = pair_key(my_secret, peer_public)?;
    aead::decrypt(&key, envelope.as_bytes(), ENVELOPE_AAD)
}

/// Decrypt the hex wire form; malformed input never reaches the cipher.
pub fn open_hex(
    wire: &str,
    my_secret: &StaticSecret,
    peer_public: &X25519Public,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let envelope = EncryptedEnvelope::from_hex(wire)?;
    open(&envelope, my_secret, peer_public)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{public_key_from_identity, AccountKeyPair};

    #[test]
    fn receiver_and_sender_can_open() {
        let alice = AccountKeyPair::generate();
        let bob = AccountKeyPair::generate();
        let bob_pub = public_key_from_identity(bob.account_id()).unwrap();
        let alice_pub = public_key_from_identity(alice.account_id()).unwrap();

        let env = seal(b"hello", &alice.box_secret(), &bob_pub).unwrap();

        let by_bob = open(&env, &bob.box_secret(), &alice_pub).unwrap();
        assert_eq!(by_bob.as_slice(), b"hello");

        let by_alice = open(&env, &alice.box_secret(), &bob_pub).unwrap();
        assert_eq!(by_alice.as_slice(), b"hello");
    }

    #[test]
    fn third_party_gets_authentication_failure() {
        let alice = AccountKeyPair::generate();
        let bob = AccountKeyPair::generate();
        let eve = AccountKeyPair::generate();
        let bob_pub = bob.box_public();

        let env = seal(b"secret", &alice.box_secret(), &bob_pub).unwrap();
        let err = open(&env, &eve.box_secret(), &alice.box_public()).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn tampering_is_detected() {
        let alice = AccountKeyPair::generate();
        let bob = AccountKeyPair::generate();
        let env = seal(b"secret", &alice.box_secret(), &bob.box_public()).unwrap();

        let mut bytes = env.as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = EncryptedEnvelope::from_bytes(bytes).unwrap();
        let err = open(&tampered, &bob.box_secret(), &alice.box_public()).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn open_hex_distinguishes_malformed() {
        let bob = AccountKeyPair::generate();
        let alice = AccountKeyPair::generate();
        let err = open_hex("deadbeef", &bob.box_secret(), &alice.box_public()).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedEnvelope(_)));
    }

    #[test]
    fn low_order_point_rejected() {
        let alice = AccountKeyPair::generate();
        let zero = X25519Public::from([0u8; 32]);
        let err = seal(b"x", &alice.box_secret(), &zero).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey(_)));
    }
}
