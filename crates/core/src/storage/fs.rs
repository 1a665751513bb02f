//! Filesystem object storage.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::debug;

use super::error::StorageError;
use super::traits::ObjectStorage;
use super::url::public_url;
use crate::config::FsStorageConfig;

/// Copies objects into `{root}/{bucket}/{key}`.
///
/// Objects are written under a `.partial` name and renamed into place once
/// complete, so a served directory never exposes half-written files.
pub struct FsStorage {
    bucket_dir: PathBuf,
    buffer_size: usize,
    public_url_prefix: String,
}

impl FsStorage {
    /// Creates a new filesystem storage with the given configuration.
    pub fn new(config: &FsStorageConfig, bucket: &str, public_url_prefix: &str) -> Self {
        Self {
            bucket_dir: config.root.join(bucket.trim_matches('/')),
            buffer_size: config.buffer_size.max(1),
            public_url_prefix: public_url_prefix.to_string(),
        }
    }

    /// Destination path of an object.
    pub fn object_path(&self, remote_key: &str) -> PathBuf {
        remote_key
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .fold(self.bucket_dir.clone(), |path, segment| path.join(segment))
    }

    async fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        progress_tx: Option<&mpsc::Sender<u64>>,
    ) -> Result<u64, StorageError> {
        let source_file = File::open(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::SourceNotFound {
                    path: source.to_path_buf(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;

        let write_failed = |e| StorageError::WriteFailed {
            path: destination.to_path_buf(),
            source: e,
        };

        let dest_file = File::create(destination).await.map_err(write_failed)?;

        let mut reader = BufReader::with_capacity(self.buffer_size, source_file);
        let mut writer = BufWriter::with_capacity(self.buffer_size, dest_file);

        let mut total_bytes = 0u64;
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            let bytes_read = reader.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }

            writer
                .write_all(&buffer[..bytes_read])
                .await
                .map_err(write_failed)?;

            total_bytes += bytes_read as u64;
            if let Some(tx) = progress_tx {
                let _ = tx.try_send(total_bytes);
            }
        }

        writer.flush().await.map_err(write_failed)?;

        Ok(total_bytes)
    }
}

#[async_trait]
impl ObjectStorage for FsStorage {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_key: &str,
        progress_tx: Option<mpsc::Sender<u64>>,
    ) -> Result<String, StorageError> {
        let destination = self.object_path(remote_key);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::WriteFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let mut partial = destination.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let bytes = match self
            .copy_file(local_path, &partial, progress_tx.as_ref())
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        fs::rename(&partial, &destination)
            .await
            .map_err(|e| StorageError::WriteFailed {
                path: destination.clone(),
                source: e,
            })?;

        debug!(path = %destination.display(), bytes, "Stored object");

        Ok(public_url(&self.public_url_prefix, remote_key))
    }

    async fn validate(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.bucket_dir)
            .await
            .map_err(|e| StorageError::WriteFailed {
                path: self.bucket_dir.clone(),
                source: e,
            })
    }
}
