use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::warn;

use snapsync_types::Digest;

use crate::error::{Result, SnapError};

/// Content-addressable object store.
///
/// One file per unique chunk digest under `objects/`, sharded two levels
/// deep by the first two hex characters (`ab/abcdef...`) so no single
/// directory accumulates millions of entries. At most one object exists per
/// digest at any time.
///
/// Reference counts live only in memory behind a single reader-writer lock;
/// they are lost on restart and preexisting objects are treated as count 1.
/// Snapshot records are the durable rooting mechanism — see
/// `SnapshotManager::collect_garbage`.
pub struct Cas {
    base: PathBuf,
    refs: RwLock<HashMap<String, u64>>,
}

/// Aggregate store statistics from a filesystem walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CasStats {
    pub object_count: u64,
    pub total_bytes: u64,
}

impl Cas {
    /// Open (creating if needed) the object store under `<repo>/objects`.
    pub fn open(repo_path: &Path) -> Result<Self> {
        let base = repo_path.join("objects");
        fs::create_dir_all(&base)?;
        Ok(Self {
            base,
            refs: RwLock::new(HashMap::new()),
        })
    }

    /// Store `data` under the digest of its own bytes.
    ///
    /// Idempotent: a repeat put of the same bytes bumps the in-memory
    /// reference count and returns the same digest without rewriting.
    pub fn put(&self, data: &[u8]) -> Result<String> {
        let digest = Digest::of_bytes(data).to_hex();
        self.put_with_digest(&digest, data)?;
        Ok(digest)
    }

    /// Store `data` under a caller-supplied digest.
    ///
    /// Used by the snapshot pipeline, which addresses transformed
    /// (compressed/encrypted) bytes by the digest of their plaintext.
    /// Returns `true` when a new object file was written.
    pub fn put_with_digest(&self, digest: &str, data: &[u8]) -> Result<bool> {
        validate_digest(digest)?;
        let mut refs = self.refs.write().unwrap_or_else(|e| e.into_inner());

        let path = self.object_path(digest);
        if path.is_file() {
            *refs.entry(digest.to_string()).or_insert(0) += 1;
            return Ok(false);
        }

        let parent = path
            .parent()
            .ok_or_else(|| SnapError::Protocol(format!("invalid object path for {digest}")))?;
        fs::create_dir_all(parent)?;

        // Write-then-rename so a concurrent reader never observes a partial
        // object file.
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| SnapError::Io(e.error))?;

        refs.insert(digest.to_string(), 1);
        Ok(true)
    }

    /// Cheap presence check (a stat).
    pub fn has(&self, digest: &str) -> bool {
        self.object_path(digest).is_file()
    }

    /// Read an object and verify that digesting its stored bytes yields its
    /// address. Only valid for objects written without a transform pipeline;
    /// transformed objects are read with `get_unverified`.
    pub fn get(&self, digest: &str) -> Result<Vec<u8>> {
        let data = self.get_unverified(digest)?;
        let actual = Digest::of_bytes(&data).to_hex();
        if actual != digest {
            return Err(SnapError::Corruption(digest.to_string()));
        }
        Ok(data)
    }

    /// Read an object's stored bytes without the raw digest check.
    ///
    /// Integrity of transformed objects comes from the AEAD tag or the codec
    /// frame, checked when the pipeline decodes them.
    pub fn get_unverified(&self, digest: &str) -> Result<Vec<u8>> {
        let _refs = self.refs.read().unwrap_or_else(|e| e.into_inner());
        match fs::read(self.object_path(digest)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SnapError::NotFound(digest.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Size in bytes of a stored object.
    pub fn size(&self, digest: &str) -> Result<u64> {
        match fs::metadata(self.object_path(digest)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SnapError::NotFound(digest.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Decrement the reference count; remove the object file when it reaches
    /// zero. An object unseen by this process counts as 1. Fails with
    /// `NotFound` if no object exists.
    pub fn delete(&self, digest: &str) -> Result<()> {
        let mut refs = self.refs.write().unwrap_or_else(|e| e.into_inner());

        let path = self.object_path(digest);
        if !path.is_file() {
            return Err(SnapError::NotFound(digest.to_string()));
        }

        if let Some(count) = refs.get_mut(digest) {
            if *count > 1 {
                *count -= 1;
                return Ok(());
            }
            refs.remove(digest);
        }

        fs::remove_file(&path)?;
        Ok(())
    }

    /// Remove an object file regardless of its reference count.
    /// The garbage collector's path; snapshot records are the source of truth.
    pub(crate) fn remove_unchecked(&self, digest: &str) -> Result<()> {
        let mut refs = self.refs.write().unwrap_or_else(|e| e.into_inner());
        refs.remove(digest);
        match fs::remove_file(self.object_path(digest)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SnapError::NotFound(digest.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate all present object digests.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut digests = Vec::new();
        for shard in fs::read_dir(&self.base)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.len() == 64 {
                    digests.push(name);
                } else {
                    warn!(name, "ignoring stray file in object store");
                }
            }
        }
        digests.sort_unstable();
        Ok(digests)
    }

    /// Object count and total stored bytes from a filesystem walk.
    pub fn stats(&self) -> Result<CasStats> {
        let mut stats = CasStats::default();
        for shard in fs::read_dir(&self.base)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    stats.object_count += 1;
                    stats.total_bytes += entry.metadata()?.len();
                }
            }
        }
        Ok(stats)
    }

    /// Read and hash every object; return the digests whose stored bytes no
    /// longer match their address. Only meaningful for untransformed stores;
    /// transformed repositories use `SnapshotManager::verify_snapshot`.
    pub fn verify(&self) -> Result<Vec<String>> {
        let mut corrupted = Vec::new();
        for digest in self.list()? {
            match self.get_unverified(&digest) {
                Ok(data) => {
                    if Digest::of_bytes(&data).to_hex() != digest {
                        corrupted.push(digest);
                    }
                }
                Err(_) => corrupted.push(digest),
            }
        }
        Ok(corrupted)
    }

    fn object_path(&self, digest: &str) -> PathBuf {
        if digest.len() < 2 {
            return self.base.join(digest);
        }
        self.base.join(&digest[..2]).join(digest)
    }
}

/// Reject addresses that are not 64 lowercase hex chars; anything else could
/// escape the shard layout or collide with temp files.
fn validate_digest(digest: &str) -> Result<()> {
    if digest.len() != 64
        || !digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(SnapError::Protocol(format!(
            "invalid object digest: '{digest}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cas() -> (tempfile::TempDir, Cas) {
        let dir = tempfile::tempdir().unwrap();
        let cas = Cas::open(dir.path()).unwrap();
        (dir, cas)
    }

    #[test]
    fn put_returns_content_digest_and_shards_path() {
        let (dir, cas) = temp_cas();
        let digest = cas.put(b"hello cas").unwrap();
        assert_eq!(digest, Digest::of_bytes(b"hello cas").to_hex());
        let path = dir.path().join("objects").join(&digest[..2]).join(&digest);
        assert!(path.is_file());
    }

    #[test]
    fn put_is_idempotent() {
        let (_dir, cas) = temp_cas();
        let d1 = cas.put(b"same bytes").unwrap();
        let d2 = cas.put(b"same bytes").unwrap();
        assert_eq!(d1, d2);
        assert_eq!(cas.stats().unwrap().object_count, 1);
    }

    #[test]
    fn get_roundtrip_and_missing() {
        let (_dir, cas) = temp_cas();
        let digest = cas.put(b"roundtrip").unwrap();
        assert_eq!(cas.get(&digest).unwrap(), b"roundtrip");

        let absent = Digest::of_bytes(b"never stored").to_hex();
        assert!(matches!(cas.get(&absent), Err(SnapError::NotFound(_))));
    }

    #[test]
    fn get_detects_corruption() {
        let (dir, cas) = temp_cas();
        let digest = cas.put(b"precious data").unwrap();

        // Flip one bit on disk.
        let path = dir.path().join("objects").join(&digest[..2]).join(&digest);
        let mut data = fs::read(&path).unwrap();
        data[0] ^= 0x01;
        fs::write(&path, &data).unwrap();

        assert!(matches!(cas.get(&digest), Err(SnapError::Corruption(_))));
        assert_eq!(cas.verify().unwrap(), vec![digest]);
    }

    #[test]
    fn delete_follows_reference_count() {
        let (_dir, cas) = temp_cas();
        let digest = cas.put(b"counted").unwrap();
        cas.put(b"counted").unwrap(); // refcount 2

        cas.delete(&digest).unwrap();
        assert!(cas.has(&digest), "object must survive first delete");

        cas.delete(&digest).unwrap();
        assert!(!cas.has(&digest), "object must be gone at refcount zero");

        assert!(matches!(cas.delete(&digest), Err(SnapError::NotFound(_))));
    }

    #[test]
    fn delete_of_preexisting_object_removes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let digest = {
            let cas = Cas::open(dir.path()).unwrap();
            cas.put(b"from a previous process").unwrap()
        };

        // Fresh open: refcount unknown, treated as 1.
        let cas = Cas::open(dir.path()).unwrap();
        cas.delete(&digest).unwrap();
        assert!(!cas.has(&digest));
    }

    #[test]
    fn put_with_digest_stores_transformed_bytes_under_plaintext_address() {
        let (_dir, cas) = temp_cas();
        let address = Digest::of_bytes(b"plaintext").to_hex();
        let stored = b"not-the-plaintext-bytes";

        assert!(cas.put_with_digest(&address, stored).unwrap());
        assert!(!cas.put_with_digest(&address, stored).unwrap());

        assert_eq!(cas.get_unverified(&address).unwrap(), stored);
        // The raw digest check must reject the transformed bytes.
        assert!(matches!(cas.get(&address), Err(SnapError::Corruption(_))));
    }

    #[test]
    fn put_with_digest_rejects_malformed_addresses() {
        let (_dir, cas) = temp_cas();
        assert!(cas.put_with_digest("ab", b"x").is_err());
        let traversal = format!("..%2F{}", "a".repeat(59));
        assert!(cas.put_with_digest(&traversal, b"x").is_err());
        assert!(cas.put_with_digest(&"G".repeat(64), b"x").is_err());
    }

    #[test]
    fn list_and_stats_enumerate_objects() {
        let (_dir, cas) = temp_cas();
        let d1 = cas.put(b"object one").unwrap();
        let d2 = cas.put(b"object two, a bit longer").unwrap();

        let mut expected = vec![d1, d2];
        expected.sort();
        assert_eq!(cas.list().unwrap(), expected);

        let stats = cas.stats().unwrap();
        assert_eq!(stats.object_count, 2);
        assert_eq!(
            stats.total_bytes,
            (b"object one".len() + b"object two, a bit longer".len()) as u64
        );
    }

    #[test]
    fn concurrent_puts_of_same_data_converge() {
        let (_dir, cas) = temp_cas();
        let cas = std::sync::Arc::new(cas);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cas = std::sync::Arc::clone(&cas);
                std::thread::spawn(move || cas.put(b"contended bytes").unwrap())
            })
            .collect();

        let digests: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cas.stats().unwrap().object_count, 1);
    }
}
