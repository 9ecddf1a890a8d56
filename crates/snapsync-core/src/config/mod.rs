use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapError};

/// Full configuration, stored at `<repo>/config/snapsync.yaml`.
/// YAML and JSON are both accepted, distinguished by file extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapsyncConfig {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default = "default_exclusions")]
    pub exclusions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_true")]
    pub auto_init: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_encryption_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_kdf")]
    pub kdf: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: default_encryption_algorithm(),
            kdf: default_kdf(),
            key_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "zstd", "lz4", or "none".
    #[serde(default = "default_compression_algorithm")]
    pub algorithm: String,
    /// zstd level, 1..=19.
    #[serde(default = "default_compression_level")]
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: default_compression_algorithm(),
            level: default_compression_level(),
        }
    }
}

/// Remote object-store settings. The core only carries the configuration;
/// remote backends implement `storage::ObjectStore` out of tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cloud_provider")]
    pub provider: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Bytes per second; 0 means unlimited.
    #[serde(default)]
    pub max_bandwidth: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_cloud_provider(),
            bucket: String::new(),
            region: String::new(),
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            max_bandwidth: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_avg_size")]
    pub avg_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// "rabin" or "fixed".
    #[serde(default = "default_chunking_algorithm")]
    pub algorithm: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            avg_size: default_avg_size(),
            max_size: default_max_size(),
            algorithm: default_chunking_algorithm(),
        }
    }
}

impl Default for SnapsyncConfig {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig {
                path: String::new(),
                auto_init: true,
            },
            encryption: EncryptionConfig::default(),
            compression: CompressionConfig::default(),
            cloud: CloudConfig::default(),
            chunking: ChunkingConfig::default(),
            exclusions: default_exclusions(),
        }
    }
}

impl SnapsyncConfig {
    /// Read configuration from a file, choosing the format by extension.
    /// Unknown extensions try YAML first, then JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&data)
                .map_err(|e| SnapError::Config(format!("invalid YAML config: {e}")))?,
            Some("json") => serde_json::from_str(&data)?,
            _ => serde_yaml::from_str(&data)
                .or_else(|_| serde_json::from_str::<SnapsyncConfig>(&data))
                .map_err(|e| SnapError::Config(format!("unrecognized config format: {e}")))?,
        };
        config.validate();
        Ok(config)
    }

    /// Write configuration to a file; JSON for `.json`, YAML otherwise.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            _ => serde_yaml::to_string(self)
                .map_err(|e| SnapError::Config(format!("config serialize: {e}")))?,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    /// Clamp out-of-range values back into the supported envelope.
    pub fn validate(&mut self) {
        if self.chunking.min_size == 0 {
            self.chunking.min_size = default_min_size();
        }
        if self.chunking.avg_size <= self.chunking.min_size {
            self.chunking.avg_size = self.chunking.min_size * 2;
        }
        if self.chunking.max_size <= self.chunking.avg_size {
            self.chunking.max_size = self.chunking.avg_size * 4;
        }

        match self.compression.algorithm.as_str() {
            "zstd" | "lz4" | "none" => {}
            _ => self.compression.algorithm = default_compression_algorithm(),
        }
        self.compression.level = self.compression.level.clamp(1, 19);
    }
}

fn default_true() -> bool {
    true
}

fn default_encryption_algorithm() -> String {
    "aes-256-gcm".to_string()
}

fn default_kdf() -> String {
    "argon2id".to_string()
}

fn default_compression_algorithm() -> String {
    "zstd".to_string()
}

fn default_compression_level() -> i32 {
    3
}

fn default_cloud_provider() -> String {
    "s3".to_string()
}

fn default_min_size() -> usize {
    crate::chunker::DEFAULT_MIN_SIZE
}

fn default_avg_size() -> usize {
    crate::chunker::DEFAULT_AVG_SIZE
}

fn default_max_size() -> usize {
    crate::chunker::DEFAULT_MAX_SIZE
}

fn default_chunking_algorithm() -> String {
    "rabin".to_string()
}

fn default_exclusions() -> Vec<String> {
    [
        ".git",
        ".svn",
        "node_modules",
        "__pycache__",
        "*.tmp",
        "*.log",
        ".DS_Store",
        "Thumbs.db",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
