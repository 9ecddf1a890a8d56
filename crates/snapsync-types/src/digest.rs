use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};

/// A 32-byte SHA-256 content digest.
///
/// This is the identity of every chunk and object in a repository: equal
/// plaintext bytes always produce equal digests, across runs, processes and
/// platforms. The external representation is 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

const HASH_BUF_SIZE: usize = 64 * 1024;

impl Digest {
    /// Digest a byte slice in one shot.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self::from_output(hasher)
    }

    /// Digest a reader with constant memory (64 KiB buffer).
    pub fn of_reader<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self::from_output(hasher))
    }

    fn from_output(hasher: Sha256) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Digest(out)
    }

    /// Hex-encode the full digest for use as a storage key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character lowercase hex string back into a digest.
    pub fn parse_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let bytes = hex::decode(s).ok()?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(Digest(out))
    }

    /// First byte as a two-char hex string, used for the shard directory.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // Published SHA-256 test vectors; pins the digest across platforms.
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn known_vectors() {
        assert_eq!(Digest::of_bytes(b"").to_hex(), EMPTY_SHA256);
        assert_eq!(Digest::of_bytes(b"abc").to_hex(), ABC_SHA256);
    }

    #[test]
    fn deterministic() {
        let data = b"some repeated content";
        assert_eq!(Digest::of_bytes(data), Digest::of_bytes(data));
    }

    #[test]
    fn different_data_different_digest() {
        assert_ne!(Digest::of_bytes(b"hello"), Digest::of_bytes(b"world"));
    }

    #[test]
    fn reader_matches_bytes() {
        // Longer than the internal buffer so multiple reads happen.
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let streamed = Digest::of_reader(Cursor::new(&data)).unwrap();
        assert_eq!(streamed, Digest::of_bytes(&data));
    }

    #[test]
    fn hex_roundtrip() {
        let digest = Digest::of_bytes(b"roundtrip");
        let hex = digest.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Digest::parse_hex(&hex), Some(digest));
    }

    #[test]
    fn parse_hex_rejects_bad_input() {
        assert!(Digest::parse_hex("abc").is_none());
        assert!(Digest::parse_hex(&"zz".repeat(32)).is_none());
    }

    #[test]
    fn shard_prefix_is_first_byte() {
        let digest = Digest([0xAB; 32]);
        assert_eq!(digest.shard_prefix(), "ab");
    }

    #[test]
    fn serde_roundtrip() {
        let digest = Digest::of_bytes(b"serde roundtrip");
        let encoded = serde_json::to_vec(&digest).unwrap();
        let decoded: Digest = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(digest, decoded);
    }
}
