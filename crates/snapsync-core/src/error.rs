use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnapError>;

#[derive(Debug, Error)]
pub enum SnapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object corruption detected: {0}")]
    Corruption(String),

    #[error("authentication failed: wrong passphrase or tampered data")]
    AuthFailure,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid repository format: {0}")]
    Protocol(String),

    #[error("repository not found at '{0}'")]
    RepoNotFound(String),

    #[error("repository already exists at '{0}'")]
    RepoAlreadyExists(String),

    #[error("unsupported repository version: {0}")]
    UnsupportedVersion(u32),

    #[error("snapshot not found: '{0}'")]
    SnapshotNotFound(String),

    #[error("repository is locked by another process (lock: {0})")]
    Locked(String),

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}
