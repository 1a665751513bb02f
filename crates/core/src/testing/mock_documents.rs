//! In-memory document store for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::links::{DocumentStore, RewriteError};

/// Mock implementation of the DocumentStore trait.
///
/// Documents live in memory and are listed in path order regardless of the
/// root passed in.
#[derive(Debug, Default)]
pub struct MockDocumentStore {
    documents: Arc<RwLock<BTreeMap<PathBuf, String>>>,
    writes: Arc<RwLock<Vec<PathBuf>>>,
    unreadable: Arc<RwLock<HashSet<PathBuf>>>,
    read_only: Arc<RwLock<HashSet<PathBuf>>>,
    list_fails: Arc<RwLock<bool>>,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.documents
            .write()
            .await
            .insert(path.into(), content.into());
    }

    pub async fn content(&self, path: impl AsRef<Path>) -> Option<String> {
        self.documents.read().await.get(path.as_ref()).cloned()
    }

    /// Paths written so far, in write order.
    pub async fn recorded_writes(&self) -> Vec<PathBuf> {
        self.writes.read().await.clone()
    }

    pub async fn fail_read(&self, path: impl Into<PathBuf>) {
        self.unreadable.write().await.insert(path.into());
    }

    pub async fn fail_write(&self, path: impl Into<PathBuf>) {
        self.read_only.write().await.insert(path.into());
    }

    pub async fn fail_listing(&self) {
        *self.list_fails.write().await = true;
    }
}

fn denied() -> std::io::Error {
    std::io::Error::from(std::io::ErrorKind::PermissionDenied)
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn list_text_documents(&self, root: &Path) -> Result<Vec<PathBuf>, RewriteError> {
        if *self.list_fails.read().await {
            return Err(RewriteError::Read {
                path: root.to_path_buf(),
                source: denied(),
            });
        }
        Ok(self.documents.read().await.keys().cloned().collect())
    }

    async fn read(&self, path: &Path) -> Result<String, RewriteError> {
        if self.unreadable.read().await.contains(path) {
            return Err(RewriteError::Read {
                path: path.to_path_buf(),
                source: denied(),
            });
        }
        self.documents
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| RewriteError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }

    async fn write(&self, path: &Path, content: &str) -> Result<(), RewriteError> {
        if self.read_only.read().await.contains(path) {
            return Err(RewriteError::Write {
                path: path.to_path_buf(),
                source: denied(),
            });
        }
        self.documents
            .write()
            .await
            .insert(path.to_path_buf(), content.to_string());
        self.writes.write().await.push(path.to_path_buf());
        Ok(())
    }
}
