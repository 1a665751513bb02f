//! Vault discovery.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::types::{MediaKind, Workload, DOCUMENT_EXTENSIONS};

/// Errors that make a vault unusable. Individual unreadable entries are
/// skipped with a warning instead.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Vault root does not exist.
    #[error("Vault directory not found: {path}")]
    RootNotFound { path: PathBuf },

    /// Vault root is a file.
    #[error("Vault path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Vault root cannot be listed.
    #[error("Vault directory is unreadable: {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How discovery treats a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Media(MediaKind),
    Document,
    Ignored,
}

/// Classifies a file by extension.
pub fn classify(path: &Path) -> FileClass {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return FileClass::Ignored;
    };

    if let Some(kind) = MediaKind::from_extension(ext) {
        return FileClass::Media(kind);
    }

    let ext = ext.to_ascii_lowercase();
    if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
        FileClass::Document
    } else {
        FileClass::Ignored
    }
}

/// Walks the vault and returns every image and video in it.
///
/// Entries are visited in file-name order so repeated runs over the same
/// tree produce the same workload order. An empty workload is not an error.
pub fn discover(root: &Path) -> Result<Workload, DiscoveryError> {
    let root = open_root(root)?;
    let mut workload = Workload::new();

    for (path, size) in vault_files(&root) {
        if let FileClass::Media(kind) = classify(&path) {
            if workload.push(path.clone(), size, kind).is_none() {
                debug!(path = %path.display(), "Skipping duplicate path");
            }
        }
    }

    info!(
        root = %root.display(),
        items = workload.len(),
        bytes = workload.total_bytes(),
        "Discovered media files"
    );

    Ok(workload)
}

/// Lists the markdown documents of the vault.
pub fn list_documents(root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let root = open_root(root)?;
    Ok(vault_files(&root)
        .into_iter()
        .filter(|(path, _)| classify(path) == FileClass::Document)
        .map(|(path, _)| path)
        .collect())
}

fn open_root(root: &Path) -> Result<PathBuf, DiscoveryError> {
    let canonical = root.canonicalize().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DiscoveryError::RootNotFound {
                path: root.to_path_buf(),
            }
        } else {
            DiscoveryError::Unreadable {
                path: root.to_path_buf(),
                source: e,
            }
        }
    })?;

    if !canonical.is_dir() {
        return Err(DiscoveryError::NotADirectory { path: canonical });
    }

    std::fs::read_dir(&canonical).map_err(|e| DiscoveryError::Unreadable {
        path: canonical.clone(),
        source: e,
    })?;

    Ok(canonical)
}

/// Hidden entries below the root (`.obsidian`, `.trash`, `.git`, dotfiles).
fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// Regular files under `root` with their sizes.
///
/// Symlinks are never followed, so every returned path lies inside `root`
/// and nothing outside the vault can be scheduled for deletion.
fn vault_files(root: &Path) -> Vec<(PathBuf, u64)> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                // Permission errors land here.
                warn!(
                    path = ?err.path(),
                    error = %err,
                    "Skipping entry due to walkdir error"
                );
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!(
                    path = %entry.path().display(),
                    error = %err,
                    "Skipping entry without readable metadata"
                );
                continue;
            }
        };

        files.push((entry.into_path(), size));
    }

    files
}
