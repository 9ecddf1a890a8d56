use std::collections::HashSet;

use crate::snapshot::tree::FileTree;
use crate::snapshot::SnapshotStats;

/// Classification of one path between two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

/// One classified file with enough context for the snapshot manager to reuse
/// chunk lists for unchanged entries and chunk only added/modified ones.
#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: String,
    pub kind: DiffKind,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub old_size: Option<u64>,
    pub new_size: Option<u64>,
    pub old_chunks: Vec<String>,
    pub new_chunks: Vec<String>,
}

#[derive(Debug, Default)]
pub struct DiffResult {
    pub added: Vec<FileDiff>,
    pub modified: Vec<FileDiff>,
    pub deleted: Vec<FileDiff>,
    pub unchanged: Vec<FileDiff>,
    pub total_added: u64,
    pub total_modified: u64,
    pub total_deleted: u64,
}

impl DiffResult {
    /// All files that need chunking: added and modified, in that order.
    pub fn changed_files(&self) -> impl Iterator<Item = &FileDiff> {
        self.added.iter().chain(self.modified.iter())
    }

    /// Apply the per-file classification counts onto snapshot statistics.
    pub fn apply_counts(&self, stats: &mut SnapshotStats) {
        stats.files_added = self.added.len() as u64;
        stats.files_modified = self.modified.len() as u64;
        stats.files_deleted = self.deleted.len() as u64;
        stats.files_unchanged = self.unchanged.len() as u64;
    }
}

/// Compares two file trees by whole-file digest.
///
/// Directories are ignored; their existence is implicit in child paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct Differ;

impl Differ {
    pub fn new() -> Self {
        Differ
    }

    pub fn compare(&self, old_tree: &FileTree, new_tree: &FileTree) -> DiffResult {
        let mut result = DiffResult::default();
        let mut seen: HashSet<&str> = HashSet::new();

        for (path, new_node) in &new_tree.files {
            if new_node.is_dir {
                continue;
            }
            seen.insert(path.as_str());

            let Some(old_node) = old_tree.files.get(path).filter(|n| !n.is_dir) else {
                result.total_added += new_node.size;
                result.added.push(FileDiff {
                    path: path.clone(),
                    kind: DiffKind::Added,
                    old_hash: None,
                    new_hash: Some(new_node.hash.clone()),
                    old_size: None,
                    new_size: Some(new_node.size),
                    old_chunks: Vec::new(),
                    new_chunks: new_node.chunks.clone(),
                });
                continue;
            };

            if new_node.hash != old_node.hash {
                result.total_modified += new_node.size;
                result.modified.push(FileDiff {
                    path: path.clone(),
                    kind: DiffKind::Modified,
                    old_hash: Some(old_node.hash.clone()),
                    new_hash: Some(new_node.hash.clone()),
                    old_size: Some(old_node.size),
                    new_size: Some(new_node.size),
                    old_chunks: old_node.chunks.clone(),
                    new_chunks: new_node.chunks.clone(),
                });
            } else {
                result.unchanged.push(FileDiff {
                    path: path.clone(),
                    kind: DiffKind::Unchanged,
                    old_hash: Some(old_node.hash.clone()),
                    new_hash: Some(new_node.hash.clone()),
                    old_size: Some(old_node.size),
                    new_size: Some(new_node.size),
                    old_chunks: old_node.chunks.clone(),
                    new_chunks: new_node.chunks.clone(),
                });
            }
        }

        for (path, old_node) in &old_tree.files {
            if old_node.is_dir || seen.contains(path.as_str()) {
                continue;
            }
            result.total_deleted += old_node.size;
            result.deleted.push(FileDiff {
                path: path.clone(),
                kind: DiffKind::Deleted,
                old_hash: Some(old_node.hash.clone()),
                new_hash: None,
                old_size: Some(old_node.size),
                new_size: None,
                old_chunks: old_node.chunks.clone(),
                new_chunks: Vec::new(),
            });
        }

        result
    }

    /// Split a chunk-digest list by a storage membership predicate.
    pub fn compare_chunks<F>(&self, chunks: &[String], exists: F) -> ChunkDiff
    where
        F: Fn(&str) -> bool,
    {
        let mut diff = ChunkDiff::default();
        for digest in chunks {
            if exists(digest) {
                diff.existing.push(digest.clone());
            } else {
                diff.missing.push(digest.clone());
            }
        }
        diff
    }
}

/// Chunk digests partitioned by presence in the store.
#[derive(Debug, Default)]
pub struct ChunkDiff {
    pub missing: Vec<String>,
    pub existing: Vec<String>,
}
