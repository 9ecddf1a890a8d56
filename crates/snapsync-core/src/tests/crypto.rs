use std::collections::HashSet;

use crate::crypto::Cipher;
use crate::error::SnapError;
use crate::testutil::{seeded_bytes, test_cipher};

#[test]
fn roundtrip() {
    let cipher = test_cipher();
    let large = seeded_bytes(256 * 1024, 1);
    for plaintext in [&b""[..], &b"short"[..], &large[..]] {
        let encrypted = cipher.encrypt(plaintext).unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
    }
}

#[test]
fn ciphertext_layout() {
    // [12-byte nonce][ciphertext][16-byte tag]
    let encrypted = test_cipher().encrypt(b"hello").unwrap();
    assert_eq!(encrypted.len(), 12 + 5 + 16);
}

#[test]
fn bit_flips_fail_auth() {
    let cipher = test_cipher();
    let encrypted = cipher.encrypt(b"integrity protected payload").unwrap();

    // Flip a bit in the nonce, the ciphertext body, and the tag.
    for pos in [0, 12, encrypted.len() / 2, encrypted.len() - 1] {
        let mut tampered = encrypted.clone();
        tampered[pos] ^= 0x01;
        assert!(
            matches!(cipher.decrypt(&tampered), Err(SnapError::AuthFailure)),
            "bit flip at {pos} was not detected"
        );
    }
}

#[test]
fn short_input_fails_auth() {
    let cipher = test_cipher();
    assert!(matches!(cipher.decrypt(&[]), Err(SnapError::AuthFailure)));
    assert!(matches!(
        cipher.decrypt(&[0u8; 11]),
        Err(SnapError::AuthFailure)
    ));
    assert!(matches!(
        cipher.decrypt(&[0u8; 27]),
        Err(SnapError::AuthFailure)
    ));
}

#[test]
fn wrong_passphrase_fails_auth_and_verification() {
    let cipher = test_cipher();
    let other = Cipher::new("a different passphrase", cipher.salt()).unwrap();

    let encrypted = cipher.encrypt(b"secret").unwrap();
    assert!(matches!(
        other.decrypt(&encrypted),
        Err(SnapError::AuthFailure)
    ));

    // The stored verification hash distinguishes the keys up front.
    assert_ne!(cipher.verification_hash(), other.verification_hash());
}

#[test]
fn verification_hash_is_stable() {
    let cipher = test_cipher();
    let hash = cipher.verification_hash();
    assert_eq!(hash.len(), 64);
    assert_eq!(hash, cipher.verification_hash());
}

#[test]
fn salt_generation() {
    let a = Cipher::generate_salt();
    let b = Cipher::generate_salt();
    assert_eq!(a.len(), 32);
    assert_ne!(a, b);
    assert_ne!(a, [0u8; 32]);
}

#[test]
fn nonce_uniqueness_over_a_million_encrypts() {
    let cipher = test_cipher();
    let mut prefixes: HashSet<[u8; 12]> = HashSet::with_capacity(1_000_000);
    for _ in 0..1_000_000 {
        let encrypted = cipher.encrypt(b"x").unwrap();
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&encrypted[..12]);
        assert!(prefixes.insert(nonce), "nonce reused under the same key");
    }
}
