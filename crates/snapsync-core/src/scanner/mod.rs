use std::fs::{self, File, Metadata};
use std::path::Path;

use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

use snapsync_types::Digest;

use crate::error::{Result, SnapError};
use crate::snapshot::tree::{FileNode, FileTree};

/// Walks a directory tree into a `FileTree`.
///
/// An exclusion pattern drops an entry when it glob-matches the base name,
/// glob-matches the slash-normalized relative path, or occurs literally as a
/// substring of that path; the first hit wins and an excluded directory
/// prunes its whole subtree. Errors on individual entries abort the scan.
pub struct Scanner {
    patterns: Vec<ExcludePattern>,
}

struct ExcludePattern {
    raw: String,
    matcher: GlobMatcher,
}

impl Scanner {
    pub fn new(exclusions: &[String]) -> Result<Self> {
        let patterns = exclusions
            .iter()
            .map(|raw| {
                let matcher = GlobBuilder::new(raw)
                    .literal_separator(false)
                    .build()
                    .map_err(|e| {
                        SnapError::Config(format!("invalid exclude pattern '{raw}': {e}"))
                    })?
                    .compile_matcher();
                Ok(ExcludePattern {
                    raw: raw.clone(),
                    matcher,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Walk `source_path` and record every entry's metadata. Whole-file
    /// digests are not computed; see `scan_with_hashes`.
    pub fn scan(&self, source_path: &Path) -> Result<FileTree> {
        let source = fs::canonicalize(source_path)?;
        let root_meta = fs::symlink_metadata(&source)?;
        let mut tree = FileTree::new(node_from_metadata(&source, &root_meta)?);

        let walker = WalkDir::new(&source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.excludes_entry(entry, &source));

        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.depth() == 0 {
                continue;
            }
            let file_type = entry.file_type();
            if !file_type.is_dir() && !file_type.is_file() {
                continue; // symlinks and special files are not captured
            }

            let meta = entry.metadata().map_err(std::io::Error::from)?;
            let node = node_from_metadata(entry.path(), &meta)?;
            if node.is_dir {
                tree.dir_count += 1;
            } else {
                tree.file_count += 1;
                tree.total_size += node.size;
            }
            tree.files.insert(relative_key(entry.path(), &source), node);
        }

        Ok(tree)
    }

    /// Scan and compute a streaming whole-file digest for every file.
    pub fn scan_with_hashes(&self, source_path: &Path) -> Result<FileTree> {
        let mut tree = self.scan(source_path)?;
        for node in tree.files.values_mut() {
            if node.is_dir {
                continue;
            }
            node.hash = hash_file(Path::new(&node.path))?;
        }
        Ok(tree)
    }

    /// Fast rescan against a previous tree: entries whose (mtime, size) are
    /// unchanged carry the previous digest and chunk list forward without
    /// rehashing. Returns the new tree and the relative paths that had to be
    /// rehashed. Correct as long as modification time is trustworthy.
    pub fn quick_scan(
        &self,
        source_path: &Path,
        previous: &FileTree,
    ) -> Result<(FileTree, Vec<String>)> {
        let mut tree = self.scan(source_path)?;
        let mut changed = Vec::new();

        for (rel, node) in tree.files.iter_mut() {
            if node.is_dir {
                continue;
            }
            match previous.files.get(rel) {
                Some(prev)
                    if !prev.is_dir
                        && prev.mod_time == node.mod_time
                        && prev.size == node.size =>
                {
                    node.hash = prev.hash.clone();
                    node.chunks = prev.chunks.clone();
                }
                _ => changed.push(rel.clone()),
            }
        }

        for rel in &changed {
            if let Some(node) = tree.files.get_mut(rel) {
                node.hash = hash_file(Path::new(&node.path))?;
            }
        }

        Ok((tree, changed))
    }

    fn excludes_entry(&self, entry: &walkdir::DirEntry, source: &Path) -> bool {
        let rel = relative_key(entry.path(), source);
        let name = entry.file_name().to_string_lossy();
        self.is_excluded(&rel, &name)
    }

    fn is_excluded(&self, rel_path: &str, name: &str) -> bool {
        self.patterns.iter().any(|p| {
            p.matcher.is_match(name) || p.matcher.is_match(rel_path) || rel_path.contains(&p.raw)
        })
    }
}

/// Digest a file's contents without loading it into memory.
fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    Ok(Digest::of_reader(file)?.to_hex())
}

/// Slash-normalized path of `path` relative to `root`.
pub(crate) fn relative_key(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn node_from_metadata(path: &Path, meta: &Metadata) -> Result<FileNode> {
    let mod_time: DateTime<Utc> = meta.modified()?.into();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    Ok(FileNode {
        path: path.to_string_lossy().into_owned(),
        name,
        is_dir: meta.is_dir(),
        mode: mode_bits(meta),
        size: if meta.is_dir() { 0 } else { meta.len() },
        mod_time,
        hash: String::new(),
        chunks: Vec::new(),
    })
}

#[cfg(unix)]
fn mode_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(meta: &Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else {
        0o644
    }
}
