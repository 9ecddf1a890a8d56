use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SnapError};

/// A lock entry stored as `locks/<timestamp>-<random>.json`.
#[derive(Debug, Serialize, Deserialize)]
struct LockEntry {
    hostname: String,
    pid: u32,
    time: String,
}

/// Locks older than this are considered abandoned by a killed process.
const STALE_LOCK_SECS: i64 = 6 * 60 * 60;

/// Advisory repository lock for mutating operations (backup, snapshot
/// delete, garbage collection). Read paths do not lock; the on-disk format
/// tolerates concurrent read-only access.
///
/// Arbitration is deterministic: each contender writes a timestamp-prefixed
/// lock file and the lexicographically first key wins. Released on drop.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
}

impl RepoLock {
    pub fn acquire(repo_root: &Path) -> Result<Self> {
        let locks_dir = repo_root.join("locks");
        fs::create_dir_all(&locks_dir)?;
        cleanup_stale_locks(&locks_dir)?;

        let now = Utc::now();
        let entry = LockEntry {
            hostname: hostname(),
            pid: std::process::id(),
            time: now.to_rfc3339(),
        };
        // Timestamp prefix keeps older lock keys sorted first.
        let name = format!(
            "{:020}-{:032x}.json",
            now.timestamp_micros(),
            rand::random::<u128>()
        );
        let path = locks_dir.join(&name);
        fs::write(&path, serde_json::to_vec(&entry)?)?;

        let mut names = lock_names(&locks_dir)?;
        names.sort();
        if names.first().map(String::as_str) != Some(name.as_str()) {
            // Lost the race: withdraw our lock file.
            let _ = fs::remove_file(&path);
            let holder = names.into_iter().next().unwrap_or_else(|| "unknown".into());
            return Err(SnapError::Locked(holder));
        }

        Ok(Self { path })
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release repository lock");
        }
    }
}

fn lock_names(locks_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(locks_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".json") {
            names.push(name);
        }
    }
    Ok(names)
}

/// Remove lock files whose embedded timestamp is older than the staleness
/// window; they belong to processes that died without releasing.
fn cleanup_stale_locks(locks_dir: &Path) -> Result<()> {
    let cutoff = Utc::now().timestamp_micros() - STALE_LOCK_SECS * 1_000_000;
    for name in lock_names(locks_dir)? {
        let Some(ts) = name
            .split('-')
            .next()
            .and_then(|t| t.parse::<i64>().ok())
        else {
            continue;
        };
        if ts < cutoff {
            warn!(lock = %name, "removing stale repository lock");
            let _ = fs::remove_file(locks_dir.join(&name));
        }
    }
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
