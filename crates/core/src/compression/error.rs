//! Error types for the compression module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a compression backend.
#[derive(Debug, Error)]
pub enum ConverterError {
    /// FFmpeg binary not found.
    #[error("FFmpeg not found at path: {path}")]
    FfmpegNotFound { path: PathBuf },

    /// FFprobe binary not found.
    #[error("FFprobe not found at path: {path}")]
    FfprobeNotFound { path: PathBuf },

    /// Input file not found.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// Failed to probe media file.
    #[error("Failed to probe media file: {reason}")]
    ProbeFailed { reason: String },

    /// The file has no decodable picture.
    #[error("No video stream found in {path}")]
    NoVideoStream { path: PathBuf },

    /// Encoding process failed.
    #[error("Encoding failed: {reason}")]
    EncodeFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// Encoder exited cleanly but wrote nothing.
    #[error("Encoder produced no output at {path}")]
    OutputMissing { path: PathBuf },

    /// Failed to parse FFprobe output.
    #[error("Failed to parse media info: {reason}")]
    ParseError { reason: String },

    /// I/O error during encoding.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConverterError {
    /// Creates a new encode failed error with stderr output.
    pub fn encode_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::EncodeFailed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates a new probe failed error.
    pub fn probe_failed(reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            reason: reason.into(),
        }
    }

    /// Human-readable cause including captured encoder output, if any.
    pub fn detail(&self) -> String {
        match self {
            Self::EncodeFailed {
                reason,
                stderr: Some(stderr),
            } => format!("{}: {}", reason, stderr.trim()),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_includes_stderr() {
        let err = ConverterError::encode_failed(
            "FFmpeg exited with code: Some(1)",
            Some("Invalid data found when processing input\n".to_string()),
        );
        assert_eq!(
            err.detail(),
            "FFmpeg exited with code: Some(1): Invalid data found when processing input"
        );
    }

    #[test]
    fn test_detail_without_stderr() {
        let err = ConverterError::probe_failed("bad header");
        assert_eq!(err.detail(), "Failed to probe media file: bad header");
    }
}
