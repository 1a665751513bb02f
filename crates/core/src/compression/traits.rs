//! Trait definitions for the compression module.

use async_trait::async_trait;
use std::path::Path;

use super::error::ConverterError;
use super::types::{Dimensions, ImageJob, VideoJob};

/// A backend that can measure and re-encode media files.
///
/// Implementations must not touch the input file. A failed encode may leave
/// a partial output behind; the caller removes it.
#[async_trait]
pub trait CompressionBackend: Send + Sync {
    /// Returns the name of this backend implementation.
    fn name(&self) -> &str;

    /// Reads the pixel dimensions of an image.
    async fn probe_image(&self, path: &Path) -> Result<Dimensions, ConverterError>;

    /// Re-encodes an image as JPEG at the job's target size and quality.
    async fn encode_image(&self, job: &ImageJob) -> Result<(), ConverterError>;

    /// Reads the frame dimensions of a video's first video stream.
    async fn probe_video(&self, path: &Path) -> Result<Dimensions, ConverterError>;

    /// Re-encodes a video as H.264/AAC MP4, keeping the audio track.
    async fn encode_video(&self, job: &VideoJob) -> Result<(), ConverterError>;

    /// Validates that the backend is properly configured and ready.
    async fn validate(&self) -> Result<(), ConverterError>;
}
