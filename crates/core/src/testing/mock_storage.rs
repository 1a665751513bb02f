//! Mock object storage for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::storage::{public_url, ObjectStorage, StorageError};

/// An upload the mock accepted or rejected.
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub success: bool,
}

/// Mock implementation of the ObjectStorage trait.
///
/// Uploads report progress at half and full size and return
/// `{prefix}/{remote_key}`. Failures match on the end of the local file
/// name, since derivatives carry a random prefix.
#[derive(Debug)]
pub struct MockStorage {
    prefix: String,
    uploads: Arc<RwLock<Vec<RecordedUpload>>>,
    failures: Arc<RwLock<HashMap<String, StorageError>>>,
    upload_delay_ms: Arc<RwLock<u64>>,
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new("https://cdn.test/media")
    }
}

impl MockStorage {
    /// Create a new mock storage serving objects under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uploads: Arc::new(RwLock::new(Vec::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            upload_delay_ms: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn recorded_uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.read().await.clone()
    }

    /// Number of successful uploads.
    pub async fn upload_count(&self) -> usize {
        self.uploads
            .read()
            .await
            .iter()
            .filter(|u| u.success)
            .count()
    }

    /// Make the next upload of a file whose name ends with `suffix` fail
    /// with `error`.
    pub async fn fail_upload(&self, suffix: &str, error: StorageError) {
        self.failures
            .write()
            .await
            .insert(suffix.to_string(), error);
    }

    pub async fn set_upload_delay(&self, delay: Duration) {
        *self.upload_delay_ms.write().await = delay.as_millis() as u64;
    }
}

#[async_trait]
impl ObjectStorage for MockStorage {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_key: &str,
        progress_tx: Option<mpsc::Sender<u64>>,
    ) -> Result<String, StorageError> {
        let size = match tokio::fs::metadata(local_path).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Err(StorageError::SourceNotFound {
                    path: local_path.to_path_buf(),
                })
            }
        };

        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let failure = {
            let mut failures = self.failures.write().await;
            let matched = failures.keys().find(|suffix| name.ends_with(suffix.as_str())).cloned();
            matched.and_then(|suffix| failures.remove(&suffix))
        };

        if let Some(tx) = &progress_tx {
            let _ = tx.try_send(size / 2);
        }

        let delay = *self.upload_delay_ms.read().await;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.uploads.write().await.push(RecordedUpload {
            local_path: local_path.to_path_buf(),
            remote_key: remote_key.to_string(),
            success: failure.is_none(),
        });

        if let Some(err) = failure {
            return Err(err);
        }

        if let Some(tx) = &progress_tx {
            let _ = tx.try_send(size);
        }
        Ok(public_url(&self.prefix, remote_key))
    }

    async fn validate(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
