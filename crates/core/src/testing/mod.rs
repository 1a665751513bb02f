//! Testing utilities and mock implementations.
//!
//! Mocks for every seam of the pipeline, so a full migration can run
//! against a temporary vault without ffmpeg or a real bucket.
//!
//! # Example
//!
//! ```rust,ignore
//! use vaultlift_core::testing::{fixtures, MockCompressionBackend, MockStorage};
//!
//! fixtures::populate(vault.path(), &[("photo.png", 2048)], &[("note.md", "![[photo.png]]")]);
//! let backend = MockCompressionBackend::new();
//! backend.fail_encode("photo.png").await;
//! ```

mod mock_backend;
mod mock_documents;
mod mock_storage;

pub use mock_backend::{MockCompressionBackend, RecordedEncode};
pub use mock_documents::MockDocumentStore;
pub use mock_storage::{MockStorage, RecordedUpload};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use crate::config::{FsStorageConfig, Settings, StorageBackend, StorageConfig, VaultConfig};

    /// Public URL prefix used by the fixture settings and `MockStorage::default`.
    pub const PUBLIC_PREFIX: &str = "https://cdn.test/media";

    /// Settings for a filesystem-backed run with default tuning.
    pub fn settings(storage_root: &Path) -> Settings {
        Settings {
            vault: VaultConfig::default(),
            storage: StorageConfig {
                backend: StorageBackend::Filesystem,
                bucket: "media".to_string(),
                subfolder: "obsidian_attachments".to_string(),
                public_url_prefix: PUBLIC_PREFIX.to_string(),
                http: None,
                filesystem: Some(FsStorageConfig {
                    root: storage_root.to_path_buf(),
                    buffer_size: 64 * 1024,
                }),
            },
            compression: Default::default(),
            progress: Default::default(),
        }
    }

    /// Writes `bytes` zero bytes to `root/rel`, creating parent directories.
    pub fn write_media(root: &Path, rel: &str, bytes: usize) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create media dir");
        }
        std::fs::write(path, vec![0u8; bytes]).expect("write media");
    }

    pub fn write_note(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create note dir");
        }
        std::fs::write(path, content).expect("write note");
    }

    /// Fills `root` with the given media files and notes.
    pub fn populate(root: &Path, media: &[(&str, usize)], notes: &[(&str, &str)]) {
        for (rel, bytes) in media {
            write_media(root, rel, *bytes);
        }
        for (rel, content) in notes {
            write_note(root, rel, content);
        }
    }
}
