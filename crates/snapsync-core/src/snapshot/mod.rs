pub mod tree;

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use snapsync_types::Digest;

use crate::cas::Cas;
use crate::chunker::RabinChunker;
use crate::compress::{self, Compression};
use crate::crypto::Cipher;
use crate::diff::Differ;
use crate::error::{Result, SnapError};
use crate::repo::lock::RepoLock;
use crate::restore::Restorer;
use crate::scanner::Scanner;

use self::tree::FileTree;

/// An immutable point-in-time image of a directory tree. Written exactly
/// once at the end of a successful backup; no field ever changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Parent snapshot id; together these form a DAG rooted at first-ever
    /// backups. Cycles are impossible because the parent is always a
    /// previously persisted snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tree: FileTree,
    #[serde(default)]
    pub stats: SnapshotStats,
    pub encrypted: bool,
    pub compressed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Plaintext bytes in the captured tree.
    pub total_size: u64,
    /// Post-transform bytes newly written to the object store.
    pub stored_size: u64,
    pub chunk_count: u64,
    pub new_chunks: u64,
    pub deduplicated_size: u64,
    pub compression_ratio: f64,
    pub duration_ms: u64,
    pub files_added: u64,
    pub files_modified: u64,
    pub files_deleted: u64,
    pub files_unchanged: u64,
}

/// Aggregate repository information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoStatus {
    pub snapshot_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<DateTime<Utc>>,
    pub object_count: u64,
    pub total_stored_bytes: u64,
}

/// Result of a mark-and-sweep garbage collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub objects_removed: u64,
    pub bytes_freed: u64,
}

/// Orchestrates scan -> diff -> chunk -> transform -> store, and owns the
/// snapshot records under `snapshots/`.
pub struct SnapshotManager {
    root: PathBuf,
    cas: Cas,
    chunker: RabinChunker,
    scanner: Scanner,
    compression: Option<Compression>,
    cipher: Option<Cipher>,
}

impl SnapshotManager {
    /// Create a manager rooted at a repository directory. `compression` and
    /// `cipher` switch the per-chunk transform pipeline on; `None` means the
    /// corresponding stage is skipped entirely.
    pub fn new(
        repo_path: impl Into<PathBuf>,
        compression: Option<Compression>,
        cipher: Option<Cipher>,
    ) -> Result<Self> {
        let root = repo_path.into();
        let cas = Cas::open(&root)?;
        Ok(Self {
            root,
            cas,
            chunker: RabinChunker::default(),
            scanner: Scanner::new(&[])?,
            compression,
            cipher,
        })
    }

    pub fn set_exclusions(&mut self, patterns: &[String]) -> Result<()> {
        self.scanner = Scanner::new(patterns)?;
        Ok(())
    }

    pub fn set_chunker(&mut self, chunker: RabinChunker) {
        self.chunker = chunker;
    }

    pub fn cas(&self) -> &Cas {
        &self.cas
    }

    pub fn restorer(&self) -> Restorer<'_> {
        Restorer::new(self)
    }

    /// Create a snapshot of `source_path`.
    ///
    /// With a resolvable parent, only added and modified files are read and
    /// chunked; unchanged files reuse the parent's chunk lists without
    /// touching their bytes. If this fails partway, chunks already written
    /// stay in the store for reuse by a retry — only the snapshot record is
    /// withheld, so a partial snapshot is never observable.
    pub fn create(
        &self,
        source_path: &Path,
        description: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<Snapshot> {
        let _lock = RepoLock::acquire(&self.root)?;
        let started = Instant::now();

        let mut tree = self.scanner.scan_with_hashes(source_path)?;

        let parent_tree = parent_id.and_then(|id| match self.get(id) {
            Ok(parent) => Some(parent.tree),
            Err(e) => {
                warn!(parent = id, error = %e, "parent snapshot not resolvable; full backup");
                None
            }
        });
        let diff = parent_tree
            .as_ref()
            .map(|old| Differ::new().compare(old, &tree));

        // Unchanged files carry the parent's chunk list forward.
        if let (Some(diff), Some(parent_tree)) = (&diff, &parent_tree) {
            for entry in &diff.unchanged {
                if let (Some(node), Some(prev)) = (
                    tree.files.get_mut(&entry.path),
                    parent_tree.files.get(&entry.path),
                ) {
                    node.chunks = prev.chunks.clone();
                }
            }
        }

        let chunk_paths: Vec<String> = match &diff {
            Some(diff) => diff.changed_files().map(|f| f.path.clone()).collect(),
            None => tree
                .files
                .iter()
                .filter(|(_, node)| !node.is_dir)
                .map(|(path, _)| path.clone())
                .collect(),
        };

        let mut stats = SnapshotStats {
            total_size: tree.total_size,
            ..Default::default()
        };

        for rel in &chunk_paths {
            let node = tree
                .files
                .get_mut(rel)
                .ok_or_else(|| SnapError::Other(format!("scanned file vanished: {rel}")))?;

            let file = File::open(&node.path)?;
            let mut digests = Vec::with_capacity(node.chunks.len());
            for chunk in self.chunker.chunk_stream(file) {
                let chunk = chunk?;
                let hex = chunk.digest.to_hex();
                stats.chunk_count += 1;

                if !self.cas.has(&hex) {
                    let encoded = self.encode_chunk(&chunk.data)?;
                    self.cas.put_with_digest(&hex, &encoded)?;
                    stats.new_chunks += 1;
                    stats.stored_size += encoded.len() as u64;
                }
                digests.push(hex);
            }
            node.chunks = digests;
        }

        // Chunks reused from the parent are not re-counted; chunk_count
        // covers the files read this run, matching the dedup accounting.
        stats.deduplicated_size = stats.total_size.saturating_sub(stats.stored_size);
        stats.compression_ratio = if stats.total_size > 0 {
            stats.stored_size as f64 / stats.total_size as f64
        } else {
            1.0
        };
        match &diff {
            Some(diff) => diff.apply_counts(&mut stats),
            None => stats.files_added = tree.file_count,
        }
        stats.duration_ms = started.elapsed().as_millis() as u64;

        let snapshot = Snapshot {
            id: generate_id(),
            timestamp: Utc::now(),
            parent: parent_id.map(str::to_string),
            description: description.map(str::to_string),
            tree,
            stats,
            encrypted: self.cipher.is_some(),
            compressed: self.compression.is_some(),
        };

        self.save_record(&snapshot)?;
        info!(
            id = %snapshot.id,
            files = snapshot.tree.file_count,
            new_chunks = snapshot.stats.new_chunks,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Load a snapshot record by id.
    pub fn get(&self, id: &str) -> Result<Snapshot> {
        let data = match fs::read(self.record_path(id)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapError::SnapshotNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// All snapshots, newest first. Unreadable records are skipped with a
    /// warning rather than failing the listing.
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        let dir = self.root.join("snapshots");
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            match self.get(id) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(id, error = %e, "skipping unreadable snapshot record"),
            }
        }

        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(snapshots)
    }

    /// The most recent snapshot, if any.
    pub fn latest(&self) -> Result<Option<Snapshot>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Remove a snapshot record. Referenced chunks are left alone; run
    /// `collect_garbage` to reclaim objects no snapshot references.
    pub fn delete(&self, id: &str) -> Result<()> {
        let _lock = RepoLock::acquire(&self.root)?;
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SnapError::SnapshotNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Aggregate repository status.
    pub fn status(&self) -> Result<RepoStatus> {
        let snapshots = self.list()?;
        let stats = self.cas.stats()?;
        Ok(RepoStatus {
            snapshot_count: snapshots.len() as u64,
            last_backup: snapshots.first().map(|s| s.timestamp),
            object_count: stats.object_count,
            total_stored_bytes: stats.total_bytes,
        })
    }

    /// Mark-and-sweep: walk every snapshot record, collect the referenced
    /// chunk digests, and remove unreferenced objects from disk. The
    /// refcounted `Cas::delete` remains for eager in-process cleanup only.
    pub fn collect_garbage(&self) -> Result<GcStats> {
        let _lock = RepoLock::acquire(&self.root)?;

        let mut referenced: HashSet<String> = HashSet::new();
        for snapshot in self.list()? {
            for node in snapshot.tree.files.values() {
                referenced.extend(node.chunks.iter().cloned());
            }
        }

        let mut stats = GcStats::default();
        for digest in self.cas.list()? {
            if referenced.contains(&digest) {
                continue;
            }
            let bytes = self.cas.size(&digest)?;
            self.cas.remove_unchecked(&digest)?;
            stats.objects_removed += 1;
            stats.bytes_freed += bytes;
        }

        info!(
            objects = stats.objects_removed,
            bytes = stats.bytes_freed,
            "garbage collection finished"
        );
        Ok(stats)
    }

    /// Decode every chunk a snapshot references and check that the decoded
    /// plaintext digests back to its address. Returns the offending digests.
    /// This is the integrity check that works for transformed repositories,
    /// where `Cas::verify`'s raw byte check does not apply.
    pub fn verify_snapshot(&self, snapshot: &Snapshot) -> Result<Vec<String>> {
        let mut unique: HashSet<&str> = HashSet::new();
        for node in snapshot.tree.files.values() {
            unique.extend(node.chunks.iter().map(String::as_str));
        }

        let mut corrupted = Vec::new();
        for digest in unique {
            match self.decode_chunk(snapshot, digest) {
                Ok(plain) if Digest::of_bytes(&plain).to_hex() == digest => {}
                Ok(_) => corrupted.push(digest.to_string()),
                Err(SnapError::Config(msg)) => return Err(SnapError::Config(msg)),
                Err(e) => {
                    debug!(digest, error = %e, "chunk failed verification");
                    corrupted.push(digest.to_string());
                }
            }
        }
        corrupted.sort_unstable();
        Ok(corrupted)
    }

    /// Write-path transform: compress, then encrypt. Both stages optional.
    fn encode_chunk(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut data = match self.compression {
            Some(codec) => compress::compress(codec, plaintext)?,
            None => plaintext.to_vec(),
        };
        if let Some(cipher) = &self.cipher {
            data = cipher.encrypt(&data)?;
        }
        Ok(data)
    }

    /// Read-path inverse: decrypt first (encrypt was the last write step),
    /// then decompress, per the flags recorded on the snapshot.
    pub(crate) fn decode_chunk(&self, snapshot: &Snapshot, digest: &str) -> Result<Vec<u8>> {
        let transformed = snapshot.encrypted || snapshot.compressed;
        let mut data = if transformed {
            self.cas.get_unverified(digest)?
        } else {
            return self.cas.get(digest);
        };

        if snapshot.encrypted {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                SnapError::Config(
                    "snapshot is encrypted but the repository was opened without a passphrase"
                        .into(),
                )
            })?;
            data = cipher.decrypt(&data)?;
        }
        if snapshot.compressed {
            data = compress::decompress(&data)?;
        }
        Ok(data)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join("snapshots").join(format!("{id}.json"))
    }

    /// Persist the record atomically; a crash mid-write leaves no partial
    /// snapshot visible.
    fn save_record(&self, snapshot: &Snapshot) -> Result<()> {
        let dir = self.root.join("snapshots");
        fs::create_dir_all(&dir)?;
        let data = serde_json::to_vec_pretty(snapshot)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.persist(self.record_path(&snapshot.id))
            .map_err(|e| SnapError::Io(e.error))?;
        Ok(())
    }
}

/// 128 random bits as 32 hex chars: collision-safe even under parallel
/// backups, unlike the wall-clock stamps of format version 1.
fn generate_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}
