//! Types for the compression module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Pixel dimensions of an image or video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scales down so the longer side is at most `max`, keeping the aspect
    /// ratio. Sizes already within bounds are returned unchanged; the
    /// shorter side is floored and never drops below 1.
    pub fn fit_within(self, max: u32) -> Self {
        if self.width <= max && self.height <= max {
            return self;
        }

        let scale = |short: u32, long: u32| -> u32 {
            let scaled = u64::from(short) * u64::from(max) / u64::from(long.max(1));
            (scaled as u32).max(1)
        };

        if self.width > self.height {
            Self::new(max, scale(self.height, self.width))
        } else {
            Self::new(scale(self.width, self.height), max)
        }
    }

    /// Rounds both sides down to even values (minimum 2), as 4:2:0 video
    /// encoders require.
    pub fn to_even(self) -> Self {
        let even = |v: u32| (v & !1).max(2);
        Self::new(even(self.width), even(self.height))
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single image re-encode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target: Dimensions,
    /// JPEG quality (1-100).
    pub quality: u8,
}

/// A single video re-encode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target: Dimensions,
    pub crf: u8,
    pub audio_bitrate_kbps: u32,
}
