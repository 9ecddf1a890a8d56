pub mod lock;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compress::Compression;
use crate::config::SnapsyncConfig;
use crate::crypto::{Cipher, SALT_LEN};
use crate::error::{Result, SnapError};
use crate::snapshot::SnapshotManager;

/// Current repository format version. Version 1 used wall-clock-nanosecond
/// snapshot ids; version 2 uses random 128-bit hex ids.
pub const REPO_FORMAT_VERSION: u32 = 2;

/// Persisted (unencrypted) at `<repo>/repo.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub version: u32,
    pub created: DateTime<Utc>,
    pub encrypted: bool,
}

/// A handle to a repository on disk.
///
/// `open` runs the memory-hard KDF at most once; the derived cipher moves
/// into the `SnapshotManager` via `into_manager`.
#[derive(Debug)]
pub struct Repository {
    root: PathBuf,
    info: RepoInfo,
    config: SnapsyncConfig,
    cipher: Option<Cipher>,
}

impl Repository {
    /// Initialize a new repository: directory scaffold, `repo.json`, and the
    /// full configuration at `config/snapsync.yaml`. For encrypted
    /// repositories the salt is materialized on first `open` with a
    /// passphrase, not here.
    pub fn init(path: &Path, mut config: SnapsyncConfig) -> Result<Repository> {
        if path.join("repo.json").exists() {
            return Err(SnapError::RepoAlreadyExists(path.display().to_string()));
        }
        config.validate();

        for dir in ["objects", "snapshots", "config", "locks"] {
            fs::create_dir_all(path.join(dir))?;
        }

        let info = RepoInfo {
            version: REPO_FORMAT_VERSION,
            created: Utc::now(),
            encrypted: config.encryption.enabled,
        };
        fs::write(path.join("repo.json"), serde_json::to_vec_pretty(&info)?)?;
        config.save(&path.join("config").join("snapsync.yaml"))?;

        info!(path = %path.display(), encrypted = info.encrypted, "initialized repository");
        Ok(Repository {
            root: path.to_path_buf(),
            info,
            config,
            cipher: None,
        })
    }

    /// Open an existing repository.
    ///
    /// For an encrypted repository a passphrase is required; a wrong one is
    /// rejected against the stored verification hash before any decryption
    /// is attempted.
    pub fn open(path: &Path, passphrase: Option<&str>) -> Result<Repository> {
        let info: RepoInfo = match fs::read(path.join("repo.json")) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapError::RepoNotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if info.version > REPO_FORMAT_VERSION {
            return Err(SnapError::UnsupportedVersion(info.version));
        }

        let config_path = path.join("config").join("snapsync.yaml");
        let mut config = if config_path.is_file() {
            SnapsyncConfig::load(&config_path)?
        } else {
            SnapsyncConfig::default()
        };
        config.validate();

        let encrypted = info.encrypted || config.encryption.enabled;
        let cipher = if encrypted {
            let pass = passphrase.ok_or_else(|| {
                SnapError::Config("passphrase required for encrypted repository".into())
            })?;
            Some(open_cipher(path, pass)?)
        } else {
            None
        };

        Ok(Repository {
            root: path.to_path_buf(),
            info,
            config,
            cipher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn info(&self) -> &RepoInfo {
        &self.info
    }

    pub fn config(&self) -> &SnapsyncConfig {
        &self.config
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Build the snapshot manager, moving the derived cipher into it.
    pub fn into_manager(self) -> Result<SnapshotManager> {
        let compression = if self.config.compression.enabled {
            Some(Compression::from_config(
                &self.config.compression.algorithm,
                self.config.compression.level,
            )?)
        } else {
            None
        };

        if self.config.chunking.algorithm == "fixed" {
            warn!("fixed chunking is a testing baseline; backups use rabin parameters");
        }
        let chunker = crate::chunker::RabinChunker::new(
            self.config.chunking.min_size,
            self.config.chunking.avg_size,
            self.config.chunking.max_size,
        );

        let mut manager = SnapshotManager::new(self.root.clone(), compression, self.cipher)?;
        manager.set_exclusions(&self.config.exclusions)?;
        manager.set_chunker(chunker);
        Ok(manager)
    }
}

/// Load or materialize the salt, derive the key (the one slow KDF call per
/// open), and check the passphrase against the stored verification hash.
fn open_cipher(root: &Path, passphrase: &str) -> Result<Cipher> {
    let config_dir = root.join("config");
    let salt_path = config_dir.join("salt");
    let verify_path = config_dir.join("verify");

    let salt: [u8; SALT_LEN] = if salt_path.is_file() {
        let text = fs::read_to_string(&salt_path)?;
        let bytes = hex::decode(text.trim())
            .map_err(|e| SnapError::Protocol(format!("malformed salt file: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| SnapError::Protocol("malformed salt file: wrong length".into()))?
    } else {
        // First use of an encrypted repository: persist a fresh salt so the
        // same passphrase derives the same key on every later open.
        let salt = Cipher::generate_salt();
        fs::create_dir_all(&config_dir)?;
        fs::write(&salt_path, hex::encode(salt))?;
        restrict_permissions(&salt_path);
        salt
    };

    let cipher = Cipher::new(passphrase, &salt)?;

    if verify_path.is_file() {
        let stored = fs::read_to_string(&verify_path)?;
        if stored.trim() != cipher.verification_hash() {
            return Err(SnapError::AuthFailure);
        }
    } else {
        fs::write(&verify_path, cipher.verification_hash())?;
        restrict_permissions(&verify_path);
    }

    Ok(cipher)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!(path = %path.display(), error = %e, "failed to restrict key material permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
