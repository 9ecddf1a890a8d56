pub mod local_store;

pub use local_store::LocalStore;

use crate::error::Result;

/// Abstract key-value object storage for remote repository backends.
/// Keys are `/`-separated string paths (e.g. `objects/ab/ab01cd...`).
///
/// The core only ships `LocalStore`; S3-compatible and other remote
/// implementations plug in behind this trait. Remote implementations are
/// expected to enforce per-operation timeouts on their own (suggested:
/// 30 minutes for put/get, 5 minutes for delete, 10 minutes for list,
/// 30 seconds for exists/size).
pub trait ObjectStore: Send + Sync {
    /// Write an object. Overwrites if the key already exists.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Read an object by key. Returns `None` if not found.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete an object. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// List all keys under a prefix. Returns full key paths.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check whether a key exists; cheap (metadata only).
    fn exists(&self, key: &str) -> Result<bool>;

    /// Size in bytes of an object. Returns `None` if not found.
    fn size(&self, key: &str) -> Result<Option<u64>>;

    /// Release backend resources. No-op for stateless backends.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
