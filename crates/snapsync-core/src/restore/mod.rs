use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

use crate::error::{Result, SnapError};
use crate::snapshot::tree::FileNode;
use crate::snapshot::{Snapshot, SnapshotManager};

/// Options controlling a restore operation.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Directory to restore into.
    pub target_path: PathBuf,
    /// Glob patterns to include (empty = everything).
    pub include: Vec<String>,
    /// Glob patterns to exclude.
    pub exclude: Vec<String>,
    /// Overwrite files that already exist at the target.
    pub overwrite: bool,
    /// Restore POSIX permission bits after writing.
    pub preserve_permissions: bool,
    /// Report what would be restored without writing anything.
    pub dry_run: bool,
}

impl RestoreOptions {
    pub fn new(target_path: impl Into<PathBuf>) -> Self {
        Self {
            target_path: target_path.into(),
            ..Default::default()
        }
    }
}

/// One file that failed to restore. Collected per operation so a single
/// unreadable chunk does not abort restoration of every other file.
#[derive(Debug)]
pub struct RestoreError {
    pub path: String,
    pub error: SnapError,
}

#[derive(Debug, Default)]
pub struct RestoreResult {
    pub files_restored: u64,
    pub bytes_restored: u64,
    pub errors: Vec<RestoreError>,
}

/// Materializes snapshot contents back onto a filesystem.
///
/// The read path reverses the write pipeline tail: object store -> decrypt
/// (if the snapshot is encrypted) -> decompress (if compressed) -> write,
/// chunk by chunk in recorded order.
pub struct Restorer<'a> {
    manager: &'a SnapshotManager,
}

impl<'a> Restorer<'a> {
    pub(crate) fn new(manager: &'a SnapshotManager) -> Self {
        Self { manager }
    }

    /// Restore every file of `snapshot` selected by the options.
    pub fn restore(&self, snapshot: &Snapshot, opts: &RestoreOptions) -> Result<RestoreResult> {
        let include = compile_patterns(&opts.include)?;
        let exclude = compile_patterns(&opts.exclude)?;

        if !opts.dry_run {
            fs::create_dir_all(&opts.target_path)?;
        }

        let mut result = RestoreResult::default();
        for (rel, node) in &snapshot.tree.files {
            if node.is_dir {
                continue;
            }
            if !should_restore(rel, &include, &exclude) {
                continue;
            }

            let rel_path = match sanitize_rel_path(rel) {
                Ok(p) => p,
                Err(error) => {
                    result.errors.push(RestoreError {
                        path: rel.clone(),
                        error,
                    });
                    continue;
                }
            };
            let target = opts.target_path.join(rel_path);

            if !opts.overwrite && target.exists() {
                continue;
            }

            if opts.dry_run {
                result.files_restored += 1;
                result.bytes_restored += node.size;
                continue;
            }

            match self.restore_node(snapshot, node, &target, opts.preserve_permissions) {
                Ok(()) => {
                    result.files_restored += 1;
                    result.bytes_restored += node.size;
                }
                Err(error) => result.errors.push(RestoreError {
                    path: rel.clone(),
                    error,
                }),
            }
        }

        Ok(result)
    }

    /// Restore one file from the snapshot to an explicit target path.
    pub fn restore_file(&self, snapshot: &Snapshot, rel_path: &str, target: &Path) -> Result<()> {
        let node = snapshot
            .tree
            .files
            .get(rel_path)
            .filter(|n| !n.is_dir)
            .ok_or_else(|| SnapError::NotFound(format!("file not in snapshot: {rel_path}")))?;
        self.restore_node(snapshot, node, target, true)
    }

    /// Stream a file node's content into a writer.
    pub fn restore_to_writer<W: Write>(
        &self,
        snapshot: &Snapshot,
        node: &FileNode,
        writer: &mut W,
    ) -> Result<()> {
        for digest in &node.chunks {
            let data = self.manager.decode_chunk(snapshot, digest)?;
            writer.write_all(&data)?;
        }
        Ok(())
    }

    /// Read a file's full content from a snapshot into memory.
    pub fn file_content(&self, snapshot: &Snapshot, rel_path: &str) -> Result<Vec<u8>> {
        let node = snapshot
            .tree
            .files
            .get(rel_path)
            .filter(|n| !n.is_dir)
            .ok_or_else(|| SnapError::NotFound(format!("file not in snapshot: {rel_path}")))?;
        let mut buf = Vec::with_capacity(node.size as usize);
        self.restore_to_writer(snapshot, node, &mut buf)?;
        Ok(buf)
    }

    fn restore_node(
        &self,
        snapshot: &Snapshot,
        node: &FileNode,
        target: &Path,
        preserve_permissions: bool,
    ) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        // Scoped handle: closed on every exit path, including errors.
        let mut file = File::create(target)?;
        for digest in &node.chunks {
            let data = self.manager.decode_chunk(snapshot, digest)?;
            file.write_all(&data)?;
        }

        // Metadata restoration failures are warnings, not file failures.
        if let Err(e) = file.set_modified(SystemTime::from(node.mod_time)) {
            warn!(path = %target.display(), error = %e, "failed to restore mtime");
        }
        drop(file);

        if preserve_permissions {
            apply_mode(target, node.mode);
        }

        Ok(())
    }
}

#[cfg(unix)]
fn apply_mode(target: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(target, fs::Permissions::from_mode(mode)) {
        warn!(path = %target.display(), error = %e, "failed to restore permissions");
    }
}

#[cfg(not(unix))]
fn apply_mode(_target: &Path, _mode: u32) {}

fn compile_patterns(patterns: &[String]) -> Result<Vec<GlobMatcher>> {
    patterns
        .iter()
        .map(|raw| {
            GlobBuilder::new(raw)
                .literal_separator(false)
                .build()
                .map(|g| g.compile_matcher())
                .map_err(|e| SnapError::Config(format!("invalid restore pattern '{raw}': {e}")))
        })
        .collect()
}

/// A pattern matches against the relative path or against the base name.
fn matches_any(matchers: &[GlobMatcher], rel_path: &str, name: &str) -> bool {
    matchers
        .iter()
        .any(|m| m.is_match(rel_path) || m.is_match(name))
}

fn should_restore(rel_path: &str, include: &[GlobMatcher], exclude: &[GlobMatcher]) -> bool {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    let included = include.is_empty() || matches_any(include, rel_path, name);
    included && !matches_any(exclude, rel_path, name)
}

/// Refuse snapshot paths that could escape the restore target.
fn sanitize_rel_path(raw: &str) -> Result<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return Err(SnapError::Protocol(format!(
            "refusing to restore absolute path: {raw}"
        )));
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SnapError::Protocol(format!(
                    "refusing to restore unsafe path: {raw}"
                )));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(SnapError::Protocol(format!(
            "refusing to restore empty path: {raw}"
        )));
    }
    Ok(out)
}
