use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::compression::CompressionConfig;
use crate::progress::ProgressWeights;

/// Root settings, handed to the pipeline as an immutable value at start.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub vault: VaultConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub progress: ProgressWeights,
}

/// Vault location
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VaultConfig {
    /// Root of the vault. The CLI can override this.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Bucket (or top-level directory for the filesystem backend)
    pub bucket: String,
    /// Key prefix inside the bucket
    #[serde(default = "default_subfolder")]
    pub subfolder: String,
    /// Public base URL that objects are served from (e.g. a CDN distribution)
    pub public_url_prefix: String,
    #[serde(default)]
    pub http: Option<HttpStorageConfig>,
    #[serde(default)]
    pub filesystem: Option<FsStorageConfig>,
}

fn default_subfolder() -> String {
    "obsidian_attachments".to_string()
}

/// Available storage backends
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Http,
    Filesystem,
}

/// HTTP (S3-compatible PUT) storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpStorageConfig {
    /// Endpoint objects are PUT to, as `{endpoint}/{bucket}/{key}`
    pub endpoint: String,
    /// Bearer token. Prefer `VAULTLIFT_STORAGE__HTTP__TOKEN` over the file.
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout in seconds (0 = none)
    #[serde(default)]
    pub timeout_secs: u64,
}

/// Filesystem storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FsStorageConfig {
    /// Directory that holds the bucket directories
    pub root: PathBuf,
    /// Copy buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    64 * 1024
}

/// Sanitized settings for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSettings {
    pub vault: VaultConfig,
    pub storage: SanitizedStorageConfig,
    pub compression: CompressionConfig,
    pub progress: ProgressWeights,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    pub subfolder: String,
    pub public_url_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub token_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem_root: Option<PathBuf>,
}

impl From<&Settings> for SanitizedSettings {
    fn from(settings: &Settings) -> Self {
        let storage = &settings.storage;
        Self {
            vault: settings.vault.clone(),
            storage: SanitizedStorageConfig {
                backend: storage.backend,
                bucket: storage.bucket.clone(),
                subfolder: storage.subfolder.clone(),
                public_url_prefix: storage.public_url_prefix.clone(),
                endpoint: storage.http.as_ref().map(|h| h.endpoint.clone()),
                token_configured: storage
                    .http
                    .as_ref()
                    .and_then(|h| h.token.as_ref())
                    .is_some_and(|t| !t.is_empty()),
                filesystem_root: storage.filesystem.as_ref().map(|f| f.root.clone()),
            },
            compression: settings.compression.clone(),
            progress: settings.progress.clone(),
        }
    }
}
