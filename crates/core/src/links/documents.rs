//! Document access for the link-rewrite phase.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::workload::{list_documents, DiscoveryError};

/// Errors scoped to a single document (or to listing them).
#[derive(Debug, Error)]
pub enum RewriteError {
    /// Documents could not be listed.
    #[error("Failed to list documents: {0}")]
    List(#[from] DiscoveryError),

    /// Failed to read a document.
    #[error("Failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document is not valid UTF-8.
    #[error("Document is not valid UTF-8: {path}")]
    NotUtf8 { path: PathBuf },

    /// Failed to write a document.
    #[error("Failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A filename produced an unusable pattern.
    #[error("Invalid reference pattern for {filename}: {reason}")]
    InvalidPattern { filename: String, reason: String },
}

/// Source of the text documents whose references get rewritten.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Lists the text documents under `root`.
    async fn list_text_documents(&self, root: &Path) -> Result<Vec<PathBuf>, RewriteError>;

    /// Reads a document.
    async fn read(&self, path: &Path) -> Result<String, RewriteError>;

    /// Replaces a document's content.
    async fn write(&self, path: &Path, content: &str) -> Result<(), RewriteError>;
}

/// Markdown documents on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsDocumentStore;

impl FsDocumentStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list_text_documents(&self, root: &Path) -> Result<Vec<PathBuf>, RewriteError> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || list_documents(&root))
            .await
            .map_err(|e| RewriteError::Read {
                path: PathBuf::new(),
                source: std::io::Error::other(e),
            })?
            .map_err(RewriteError::from)
    }

    async fn read(&self, path: &Path) -> Result<String, RewriteError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RewriteError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
        String::from_utf8(bytes).map_err(|_| RewriteError::NotUtf8 {
            path: path.to_path_buf(),
        })
    }

    /// Writes next to the document and renames over it, so a failed write
    /// leaves the original intact.
    async fn write(&self, path: &Path, content: &str) -> Result<(), RewriteError> {
        let write_err = |e| RewriteError::Write {
            path: path.to_path_buf(),
            source: e,
        };

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".vaultlift-tmp");
        let tmp = PathBuf::from(tmp);

        if let Err(e) = tokio::fs::write(&tmp, content).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }
        tokio::fs::rename(&tmp, path).await.map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_roundtrip_and_listing() {
        let vault = TempDir::new().unwrap();
        std::fs::create_dir_all(vault.path().join("sub")).unwrap();
        std::fs::write(vault.path().join("a.md"), "![[x.png]]").unwrap();
        std::fs::write(vault.path().join("sub/b.markdown"), "").unwrap();
        std::fs::write(vault.path().join("x.png"), "").unwrap();

        let store = FsDocumentStore::new();
        let docs = store.list_text_documents(vault.path()).await.unwrap();
        assert_eq!(docs.len(), 2);

        let a = docs.iter().find(|d| d.ends_with("a.md")).unwrap();
        assert_eq!(store.read(a).await.unwrap(), "![[x.png]]");

        store.write(a, "[x](u)").await.unwrap();
        assert_eq!(std::fs::read_to_string(a).unwrap(), "[x](u)");
        assert!(!vault.path().join("a.md.vaultlift-tmp").exists());
    }

    #[tokio::test]
    async fn test_read_rejects_binary() {
        let vault = TempDir::new().unwrap();
        let path = vault.path().join("bad.md");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = FsDocumentStore::new().read(&path).await.unwrap_err();
        assert!(matches!(err, RewriteError::NotUtf8 { .. }));
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let err = FsDocumentStore::new()
            .write(Path::new("/nonexistent/dir/n.md"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::Write { .. }));
    }

    #[tokio::test]
    async fn test_listing_missing_root() {
        let err = FsDocumentStore::new()
            .list_text_documents(Path::new("/nonexistent/vault"))
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::List(DiscoveryError::RootNotFound { .. })));
    }
}
