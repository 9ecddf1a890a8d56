use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::chunker::RabinChunker;
use crate::crypto::Cipher;
use crate::snapshot::SnapshotManager;

/// Reproducible random bytes.
pub fn seeded_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

/// Reproducible bytes that vary per position but compress well
/// (16-symbol alphabet).
pub fn compressible_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| b'a' + rng.gen_range(0..16u8)).collect()
}

/// Write a set of (relative path, content) files under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
}

/// Shared cipher with a fixed salt so the slow KDF runs once per test binary.
pub fn test_cipher() -> &'static Cipher {
    static CIPHER: OnceLock<Cipher> = OnceLock::new();
    CIPHER.get_or_init(|| Cipher::new("test-passphrase-123", &[0x42u8; 32]).expect("test KDF"))
}

/// Chunker small enough to produce several chunks from kilobyte inputs.
pub fn small_chunker() -> RabinChunker {
    RabinChunker::new(256, 1024, 4096)
}

/// Plaintext, uncompressed manager over a fresh repo directory.
pub fn plaintext_manager(repo: &Path) -> SnapshotManager {
    let mut manager = SnapshotManager::new(repo, None, None).unwrap();
    manager.set_chunker(small_chunker());
    manager
}
