use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use snapsync_types::Digest;

use crate::error::{Result, SnapError};

/// Argon2id parameters. These are part of the on-disk format: the same
/// passphrase and salt must derive the same key across versions.
const KDF_TIME_COST: u32 = 3;
const KDF_MEMORY_KIB: u32 = 64 * 1024; // 64 MiB
const KDF_LANES: u32 = 4;
const KEY_LEN: usize = 32;

pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Passphrase-derived AES-256-GCM cipher for repository objects.
///
/// Construction runs the memory-hard KDF and is intentionally slow; it
/// happens exactly once per repository open. The derived key is zeroized
/// when the cipher is dropped.
#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
    key: Zeroizing<[u8; KEY_LEN]>,
    salt: [u8; SALT_LEN],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Derive a key from `passphrase` and `salt` and build the AEAD.
    pub fn new(passphrase: &str, salt: &[u8; SALT_LEN]) -> Result<Self> {
        let key = derive_key(passphrase, salt)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| SnapError::KeyDerivation(format!("cipher init: {e}")))?;
        Ok(Self {
            cipher,
            key,
            salt: *salt,
        })
    }

    /// Generate a fresh 32-byte salt from OS entropy.
    pub fn generate_salt() -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        salt
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    /// Hex digest of the derived key. Stored next to the salt so a wrong
    /// passphrase is rejected before any decryption is attempted.
    pub fn verification_hash(&self) -> String {
        Digest::of_bytes(self.key.as_ref()).to_hex()
    }

    /// Encrypt plaintext. Returns `[12-byte nonce][ciphertext + 16-byte tag]`.
    ///
    /// Every call draws a fresh random nonce; with a 96-bit nonce space the
    /// same key may encrypt many chunks without reuse.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SnapError::Other(format!("AES-GCM encrypt: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt data produced by `encrypt`. Fails with `AuthFailure` on any
    /// tampering, short input, or wrong key.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(SnapError::AuthFailure);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| SnapError::AuthFailure)
    }
}

/// Derive a 32-byte key from a passphrase using Argon2id.
fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let params = argon2::Params::new(KDF_MEMORY_KIB, KDF_TIME_COST, KDF_LANES, Some(KEY_LEN))
        .map_err(|e| SnapError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, output.as_mut())
        .map_err(|e| SnapError::KeyDerivation(format!("argon2 hash: {e}")))?;
    Ok(output)
}
