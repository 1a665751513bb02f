//! Trait definitions for the storage module.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

use super::error::StorageError;

/// A remote (or remote-like) object store.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Returns the name of this storage implementation.
    fn name(&self) -> &str;

    /// Uploads `local_path` under `remote_key` and returns its public URL.
    ///
    /// If `progress_tx` is given it receives the cumulative number of bytes
    /// sent so far. Updates are dropped rather than awaited when the
    /// receiver lags, so a slow consumer never stalls the transfer.
    async fn upload(
        &self,
        local_path: &Path,
        remote_key: &str,
        progress_tx: Option<mpsc::Sender<u64>>,
    ) -> Result<String, StorageError>;

    /// Validates that the storage is properly configured and reachable.
    async fn validate(&self) -> Result<(), StorageError>;
}
