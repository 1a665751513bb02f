//! FFmpeg-based compression backend.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use super::config::CompressionConfig;
use super::error::ConverterError;
use super::traits::CompressionBackend;
use super::types::{Dimensions, ImageJob, VideoJob};

/// Lines of encoder stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// FFmpeg-based compression backend.
pub struct FfmpegBackend {
    config: CompressionConfig,
}

impl FfmpegBackend {
    /// Creates a new FFmpeg backend with the given configuration.
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Creates a backend with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CompressionConfig::default())
    }

    /// Maps JPEG quality (1-100, higher is better) onto ffmpeg's mjpeg
    /// qscale (2-31, lower is better).
    fn quality_to_qscale(quality: u8) -> u8 {
        let quality = u32::from(quality.clamp(1, 100));
        let qscale = 2 + ((100 - quality) * 29 + 50) / 100;
        qscale.clamp(2, 31) as u8
    }

    /// Builds ffmpeg arguments for an image re-encode.
    fn build_image_args(&self, job: &ImageJob) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            job.input.to_string_lossy().to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", job.target.width, job.target.height),
            "-frames:v".to_string(),
            "1".to_string(),
            "-update".to_string(),
            "1".to_string(),
            "-c:v".to_string(),
            "mjpeg".to_string(),
            "-q:v".to_string(),
            Self::quality_to_qscale(job.quality).to_string(),
            "-pix_fmt".to_string(),
            "yuvj420p".to_string(),
        ];

        args.extend([
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
        ]);
        args.extend(self.config.extra_ffmpeg_args.iter().cloned());
        args.push(job.output.to_string_lossy().to_string());

        args
    }

    /// Builds ffmpeg arguments for a video re-encode.
    fn build_video_args(&self, job: &VideoJob) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            job.input.to_string_lossy().to_string(),
            // First video stream, audio only if the source has one
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "0:a?".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", job.target.width, job.target.height),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-crf".to_string(),
            job.crf.to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{}k", job.audio_bitrate_kbps),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ];

        args.extend([
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
        ]);
        args.extend(self.config.extra_ffmpeg_args.iter().cloned());
        args.push(job.output.to_string_lossy().to_string());

        args
    }

    /// Parses ffprobe JSON output into the dimensions of the first video stream.
    fn parse_probe_output(path: &Path, output: &str) -> Result<Dimensions, ConverterError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            width: Option<u32>,
            height: Option<u32>,
        }

        let probe: ProbeOutput =
            serde_json::from_str(output).map_err(|e| ConverterError::ParseError {
                reason: format!("Failed to parse ffprobe output: {}", e),
            })?;

        probe
            .streams
            .iter()
            .filter(|s| s.codec_type == "video")
            .find_map(|s| match (s.width, s.height) {
                (Some(w), Some(h)) if w > 0 && h > 0 => Some(Dimensions::new(w, h)),
                _ => None,
            })
            .ok_or_else(|| ConverterError::NoVideoStream {
                path: path.to_path_buf(),
            })
    }

    async fn probe(&self, path: &Path) -> Result<Dimensions, ConverterError> {
        if !path.exists() {
            return Err(ConverterError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConverterError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    ConverterError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(ConverterError::probe_failed(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_probe_output(path, &stdout)
    }

    /// Runs ffmpeg to completion and checks that it produced `output`.
    ///
    /// The child is killed if this future is dropped, so aborting the task
    /// running an encode also stops the encoder.
    async fn run_ffmpeg(&self, args: Vec<String>, output: &Path) -> Result<(), ConverterError> {
        if let Some(input) = input_of(&args) {
            if !input.exists() {
                return Err(ConverterError::InputNotFound { path: input });
            }
        }

        debug!(args = ?args, "Running ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConverterError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    ConverterError::Io(e)
                }
            })?;

        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = child.stderr.take() {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let stderr = Vec::from(tail).join("\n");
            return Err(ConverterError::encode_failed(
                format!("FFmpeg exited with code: {:?}", status.code()),
                if stderr.is_empty() { None } else { Some(stderr) },
            ));
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(ConverterError::OutputMissing {
                path: output.to_path_buf(),
            }),
        }
    }

    async fn check_binary(&self, path: &Path) -> Result<(), std::io::Error> {
        Command::new(path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|_| ())
    }
}

/// The path following the first `-i` flag.
fn input_of(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

#[async_trait]
impl CompressionBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe_image(&self, path: &Path) -> Result<Dimensions, ConverterError> {
        self.probe(path).await
    }

    async fn encode_image(&self, job: &ImageJob) -> Result<(), ConverterError> {
        let args = self.build_image_args(job);
        self.run_ffmpeg(args, &job.output).await
    }

    async fn probe_video(&self, path: &Path) -> Result<Dimensions, ConverterError> {
        self.probe(path).await
    }

    async fn encode_video(&self, job: &VideoJob) -> Result<(), ConverterError> {
        let args = self.build_video_args(job);
        self.run_ffmpeg(args, &job.output).await
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        if let Err(e) = self.check_binary(&self.config.ffmpeg_path).await {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(ConverterError::FfmpegNotFound {
                    path: self.config.ffmpeg_path.clone(),
                });
            }
            return Err(ConverterError::Io(e));
        }

        if let Err(e) = self.check_binary(&self.config.ffprobe_path).await {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(ConverterError::FfprobeNotFound {
                    path: self.config.ffprobe_path.clone(),
                });
            }
            return Err(ConverterError::Io(e));
        }

        Ok(())
    }
}
