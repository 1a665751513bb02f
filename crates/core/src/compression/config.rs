//! Configuration for the compression module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Compression parameters and FFmpeg settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Longest allowed image side in pixels.
    #[serde(default = "default_image_max_dimension")]
    pub image_max_dimension: u32,

    /// JPEG quality (1-100).
    #[serde(default = "default_image_quality")]
    pub image_quality: u8,

    /// Longest allowed video side in pixels.
    #[serde(default = "default_video_max_dimension")]
    pub video_max_dimension: u32,

    /// x264 constant rate factor (0-51, lower is better).
    #[serde(default = "default_video_crf")]
    pub video_crf: u8,

    /// AAC bitrate for the preserved audio track.
    #[serde(default = "default_audio_bitrate")]
    pub video_audio_bitrate_kbps: u32,

    /// Concurrent image encodes.
    #[serde(default = "default_max_parallel_images")]
    pub max_parallel_images: usize,

    /// Concurrent video encodes.
    #[serde(default = "default_max_parallel_videos")]
    pub max_parallel_videos: usize,

    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Path to ffprobe binary.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[serde(default = "default_log_level")]
    pub ffmpeg_log_level: String,

    /// Additional ffmpeg arguments, inserted before the output path.
    #[serde(default)]
    pub extra_ffmpeg_args: Vec<String>,
}

fn default_image_max_dimension() -> u32 {
    1280
}

fn default_image_quality() -> u8 {
    80
}

fn default_video_max_dimension() -> u32 {
    1080
}

fn default_video_crf() -> u8 {
    28
}

fn default_audio_bitrate() -> u32 {
    192
}

fn default_max_parallel_images() -> usize {
    4
}

fn default_max_parallel_videos() -> usize {
    2
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_log_level() -> String {
    "error".to_string()
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            image_max_dimension: default_image_max_dimension(),
            image_quality: default_image_quality(),
            video_max_dimension: default_video_max_dimension(),
            video_crf: default_video_crf(),
            video_audio_bitrate_kbps: default_audio_bitrate(),
            max_parallel_images: default_max_parallel_images(),
            max_parallel_videos: default_max_parallel_videos(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            ffmpeg_log_level: default_log_level(),
            extra_ffmpeg_args: Vec::new(),
        }
    }
}

impl CompressionConfig {
    /// Creates a new config with custom ffmpeg/ffprobe paths.
    pub fn with_paths(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            ..Default::default()
        }
    }

    /// Sets both parallelism bounds.
    pub fn with_max_parallel(mut self, images: usize, videos: usize) -> Self {
        self.max_parallel_images = images;
        self.max_parallel_videos = videos;
        self
    }
}
