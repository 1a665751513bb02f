//! Object storage for uploaded derivatives.
//!
//! The upload phase talks to storage only through `ObjectStorage`. Two
//! implementations ship with the crate: `HttpStorage`, which streams a PUT
//! to an S3-style endpoint, and `FsStorage`, which copies into a local
//! directory served as a static bucket.

mod error;
mod fs;
mod http;
mod traits;
mod url;

use std::sync::Arc;

pub use error::StorageError;
pub use fs::FsStorage;
pub use http::HttpStorage;
pub use traits::ObjectStorage;
pub use url::{content_type_for, encode_key, public_url, remote_key};

use crate::config::{StorageBackend, StorageConfig};

/// Builds the storage client selected in the settings.
pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>, StorageError> {
    match config.backend {
        StorageBackend::Http => {
            let http = config
                .http
                .as_ref()
                .ok_or_else(|| StorageError::NotConfigured("storage.http".to_string()))?;
            Ok(Arc::new(HttpStorage::new(
                http,
                &config.bucket,
                &config.public_url_prefix,
            )?))
        }
        StorageBackend::Filesystem => {
            let fs = config
                .filesystem
                .as_ref()
                .ok_or_else(|| StorageError::NotConfigured("storage.filesystem".to_string()))?;
            Ok(Arc::new(FsStorage::new(
                fs,
                &config.bucket,
                &config.public_url_prefix,
            )))
        }
    }
}
