//! Compression backend for media derivatives.
//!
//! This module provides the `CompressionBackend` trait the compression phase
//! talks to, an FFmpeg implementation of it, and the pure helpers the phase
//! uses around it: target dimension math and derivative naming.
//!
//! # Features
//!
//! - Image re-encoding to JPEG at a fixed quality
//! - Video re-encoding to H.264/AAC MP4 at a fixed CRF, audio preserved
//! - Downscaling to a maximum dimension with the aspect ratio kept (never upscaling)
//! - Collision-resistant derivative names next to the original
//!
//! # Example
//!
//! ```ignore
//! use vaultlift_core::compression::{CompressionBackend, CompressionConfig, FfmpegBackend, ImageJob};
//!
//! let backend = FfmpegBackend::new(CompressionConfig::default());
//! backend.validate().await?;
//!
//! let source = backend.probe_image(Path::new("/vault/photo.png")).await?;
//! let job = ImageJob {
//!     input: PathBuf::from("/vault/photo.png"),
//!     output: PathBuf::from("/vault/Xk2...._photo.jpg"),
//!     target: source.fit_within(1280),
//!     quality: 80,
//! };
//! backend.encode_image(&job).await?;
//! ```

mod config;
mod error;
mod ffmpeg;
mod naming;
mod traits;
mod types;

pub use config::CompressionConfig;
pub use error::ConverterError;
pub use ffmpeg::FfmpegBackend;
pub use naming::{derived_filename, derived_filename_with_prefix, random_prefix, sanitize_stem, PREFIX_LEN};
pub use traits::CompressionBackend;
pub use types::{Dimensions, ImageJob, VideoJob};
