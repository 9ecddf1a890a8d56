use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SnapError};
use crate::storage::ObjectStore;

/// Object store on the local filesystem.
///
/// Keys are checked segment by segment before they ever touch the
/// filesystem; a hostile key cannot address anything outside the store
/// root.
pub struct LocalStore {
    base: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at `base`, creating the directory if needed.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// Translate a `/`-separated key into a path under the store root.
    ///
    /// The path is assembled one segment at a time. Empty, `.`, `..` and
    /// backslash-bearing segments are rejected outright instead of being
    /// normalized away; this also covers absolute keys, whose leading `/`
    /// produces an empty first segment.
    fn key_to_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(SnapError::Protocol("empty storage key".into()));
        }
        let mut path = self.base.clone();
        for segment in key.split('/') {
            let safe = !segment.is_empty()
                && segment != "."
                && segment != ".."
                && !segment.contains('\\');
            if !safe {
                return Err(SnapError::Protocol(format!(
                    "storage key '{key}' would escape the store root"
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Turn a file path from a walk back into its `/`-separated key.
    fn path_to_key(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.base).ok()?;
        let mut key = String::new();
        for part in rel.iter() {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(&part.to_string_lossy());
        }
        Some(key)
    }
}

/// Collapse "file does not exist" into `None`; pass every other failure on.
fn ignore_missing<T>(result: io::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl ObjectStore for LocalStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.key_to_path(key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = File::create(&path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_to_path(key)?;
        ignore_missing(fs::read(path))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key)?;
        ignore_missing(fs::remove_file(path))?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let start = if prefix.is_empty() {
            self.base.clone()
        } else {
            self.key_to_path(prefix)?
        };

        let mut keys = Vec::new();
        if !start.is_dir() {
            return Ok(keys);
        }

        // Iterative walk; no recursion, so pathological nesting depth
        // cannot exhaust the stack.
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let Some(entries) = ignore_missing(fs::read_dir(&dir))? else {
                continue; // removed between discovery and descent
            };
            for entry in entries {
                let entry = entry?;
                let kind = entry.file_type()?;
                if kind.is_dir() {
                    pending.push(entry.path());
                } else if kind.is_file() {
                    if let Some(key) = self.path_to_key(&entry.path()) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort_unstable();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = self.key_to_path(key)?;
        let meta = ignore_missing(fs::metadata(path))?;
        Ok(meta.is_some_and(|m| m.is_file()))
    }

    fn size(&self, key: &str) -> Result<Option<u64>> {
        let path = self.key_to_path(key)?;
        Ok(ignore_missing(fs::metadata(path))?.map(|m| m.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("store")).unwrap();
        (dir, store)
    }

    #[test]
    fn new_creates_the_root_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a/b/store");
        LocalStore::new(&root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn hostile_keys_never_reach_the_filesystem() {
        let (_dir, store) = temp_store();
        for key in [
            "",
            "/etc/passwd",
            "../sibling",
            "objects/../../escape",
            "objects/./sneaky",
            "objects\\windows",
            "trailing/",
        ] {
            assert!(
                matches!(store.key_to_path(key), Err(SnapError::Protocol(_))),
                "key '{key}' should have been rejected"
            );
        }
        assert!(store.key_to_path("objects/ab/abcdef").is_ok());
    }

    #[test]
    fn put_get_exists_size_roundtrip() {
        let (_dir, store) = temp_store();
        store.put("objects/cd/blob", b"eleven byte").unwrap();

        assert_eq!(
            store.get("objects/cd/blob").unwrap().as_deref(),
            Some(&b"eleven byte"[..])
        );
        assert!(store.exists("objects/cd/blob").unwrap());
        assert_eq!(store.size("objects/cd/blob").unwrap(), Some(11));

        assert_eq!(store.get("objects/cd/other").unwrap(), None);
        assert!(!store.exists("objects/cd/other").unwrap());
        assert_eq!(store.size("objects/cd/other").unwrap(), None);
    }

    #[test]
    fn put_overwrites_in_place() {
        let (_dir, store) = temp_store();
        store.put("k", b"first").unwrap();
        store.put("k", b"second").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"second"[..]));
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = temp_store();
        store.put("doomed", b"x").unwrap();
        store.delete("doomed").unwrap();
        assert!(!store.exists("doomed").unwrap());
        // A second delete of the same key is not an error.
        store.delete("doomed").unwrap();
    }

    #[test]
    fn exists_is_false_for_a_directory_key() {
        let (_dir, store) = temp_store();
        store.put("snapshots/s1.json", b"{}").unwrap();
        assert!(!store.exists("snapshots").unwrap());
    }

    #[test]
    fn list_walks_the_prefix_and_sorts() {
        let (_dir, store) = temp_store();
        store.put("objects/bb/two", b"2").unwrap();
        store.put("objects/aa/one", b"1").unwrap();
        store.put("objects/aa/deep/three", b"3").unwrap();
        store.put("snapshots/s1.json", b"{}").unwrap();

        assert_eq!(
            store.list("objects").unwrap(),
            vec!["objects/aa/deep/three", "objects/aa/one", "objects/bb/two"]
        );
        assert_eq!(store.list("").unwrap().len(), 4);
        assert!(store.list("absent").unwrap().is_empty());
    }
}
