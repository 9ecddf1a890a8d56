use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file or directory captured in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    /// Absolute source path.
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    /// POSIX permission bits.
    pub mode: u32,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    /// Whole-file content digest (hex), used for fast diffing.
    #[serde(default)]
    pub hash: String,
    /// Ordered chunk digests whose concatenation is the file's content.
    /// Always empty for directories.
    #[serde(default)]
    pub chunks: Vec<String>,
}

/// A scanned directory tree.
///
/// `files` maps slash-normalized source-relative paths to nodes; the scanned
/// top lives in `root` only and is excluded from the map and the counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTree {
    pub root: FileNode,
    pub files: BTreeMap<String, FileNode>,
    pub total_size: u64,
    pub file_count: u64,
    pub dir_count: u64,
}

impl FileTree {
    pub fn new(root: FileNode) -> Self {
        Self {
            root,
            files: BTreeMap::new(),
            total_size: 0,
            file_count: 0,
            dir_count: 0,
        }
    }
}
