use mp_crypto::{
    hash, open, open_hex, public_key_from_identity, seal, AccountKeyPair, CryptoError,
    EncryptedEnvelope,
};
use rand::{Rng, RngCore};

fn random_plaintext(rng: &mut impl RngCore, max: usize) -> Vec<u8> {
    let len = rng.gen_range(0..max);
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    buf
}

#[test]
fn roundtrip_for_many_pairs_and_contents() {
    let mut rng = rand::thread_rng();
    for _ in 0..32 {
        let sender = AccountKeyPair::generate();
        let receiver = AccountKeyPair::generate();
        let receiver_pub = public_key_from_identity(receiver.account_id()).unwrap();
        let sender_pub = public_key_from_identity(sender.account_id()).unwrap();

        let content = random_plaintext(&mut rng, 4096);
        let env = seal(&content, &sender.box_secret(), &receiver_pub).unwrap();

        // Through the hex wire form, as the content store would carry it.
        let opened = open_hex(&env.to_hex(), &receiver.box_secret(), &sender_pub).unwrap();
        assert_eq!(opened.as_slice(), content.as_slice());
    }
}

#[test]
fn any_other_private_key_fails_authentication() {
    let sender = AccountKeyPair::generate();
    let receiver = AccountKeyPair::generate();
    let env = seal(b"for receiver only", &sender.box_secret(), &receiver.box_public()).unwrap();

    for _ in 0..16 {
        let stranger = AccountKeyPair::generate();
        let err = open(&env, &stranger.box_secret(), &sender.box_public()).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }
}

#[test]
fn inputs_shorter_than_nonce_are_malformed() {
    let me = AccountKeyPair::generate();
    let peer = AccountKeyPair::generate();
    let mut rng = rand::thread_rng();
    for len in 0..24 {
        let mut bytes = vec![0u8; len];
        rng.fill_bytes(&mut bytes);
        let err = open_hex(&hex::encode(&bytes), &me.box_secret(), &peer.box_public())
            .unwrap_err();
        assert!(matches!(err, CryptoError::MalformedEnvelope(_)), "len {len}");
        assert!(EncryptedEnvelope::from_bytes(bytes).is_err());
    }
}

#[test]
fn envelope_wire_layout() {
    let me = AccountKeyPair::generate();
    let peer = AccountKeyPair::generate();
    let env = seal(b"abc", &me.box_secret(), &peer.box_public()).unwrap();
    assert_eq!(env.nonce().len(), 24);
    // 3 bytes of plaintext + 16-byte tag
    assert_eq!(env.ciphertext().len(), 19);
    assert_eq!(env.to_hex().len(), (24 + 19) * 2);
}

#[test]
fn hash_is_stable() {
    assert_eq!(hash(b"content"), hash(b"content"));
    assert_ne!(hash(b"content"), hash(b"Content"));
}
