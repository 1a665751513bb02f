//! Error types for the storage module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while uploading an object.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Local file to upload does not exist.
    #[error("Source file not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// Backend section missing from the settings.
    #[error("Storage backend not configured: {0}")]
    NotConfigured(String),

    /// Credentials missing or rejected.
    #[error("Storage rejected credentials: {0}")]
    Unauthorized(String),

    /// Credentials valid but not allowed to write here.
    #[error("Storage permission denied: {0}")]
    Forbidden(String),

    /// Server answered with a non-success status.
    #[error("Upload rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Request could not be completed.
    #[error("Upload request failed: {0}")]
    RequestFailed(String),

    /// Failed to write the object (filesystem backend).
    #[error("Failed to write object to {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the failure is a credential or permission problem.
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_))
    }

    /// Maps a non-success HTTP status onto an error.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 => Self::Unauthorized(body),
            403 => Self::Forbidden(body),
            _ => Self::Rejected { status, body },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(StorageError::from_status(401, "").is_credential_error());
        assert!(StorageError::from_status(403, "AccessDenied").is_credential_error());
        let err = StorageError::from_status(500, "boom");
        assert!(!err.is_credential_error());
        assert_eq!(err.to_string(), "Upload rejected with HTTP 500: boom");
    }
}
