//! Mock compression backend for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::compression::{CompressionBackend, ConverterError, Dimensions, ImageJob, VideoJob};

/// An encode the mock was asked to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEncode {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target: Dimensions,
    pub video: bool,
}

/// Mock implementation of the CompressionBackend trait.
///
/// Encodes write a small placeholder file to the job's output path, so the
/// pipeline sees a real derivative on disk.
///
/// # Example
///
/// ```rust,ignore
/// use vaultlift_core::testing::MockCompressionBackend;
///
/// let backend = MockCompressionBackend::new();
/// backend.fail_encode("broken.png").await;
/// backend.set_probe_result("photo.jpg", Dimensions::new(4000, 3000)).await;
/// ```
#[derive(Debug)]
pub struct MockCompressionBackend {
    encodes: Arc<RwLock<Vec<RecordedEncode>>>,
    /// Probe results by input file name.
    probe_results: Arc<RwLock<HashMap<String, Dimensions>>>,
    default_dimensions: Arc<RwLock<Dimensions>>,
    /// Input file names whose encode fails.
    failing: Arc<RwLock<HashSet<String>>>,
    /// If set, the next probe fails with this error.
    next_error: Arc<RwLock<Option<ConverterError>>>,
    encode_delay_ms: Arc<RwLock<u64>>,
    output_size: Arc<RwLock<usize>>,
}

impl Default for MockCompressionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompressionBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        Self {
            encodes: Arc::new(RwLock::new(Vec::new())),
            probe_results: Arc::new(RwLock::new(HashMap::new())),
            default_dimensions: Arc::new(RwLock::new(Dimensions::new(1920, 1080))),
            failing: Arc::new(RwLock::new(HashSet::new())),
            next_error: Arc::new(RwLock::new(None)),
            encode_delay_ms: Arc::new(RwLock::new(0)),
            output_size: Arc::new(RwLock::new(1024)),
        }
    }

    /// Get all recorded encodes.
    pub async fn recorded_encodes(&self) -> Vec<RecordedEncode> {
        self.encodes.read().await.clone()
    }

    pub async fn encode_count(&self) -> usize {
        self.encodes.read().await.len()
    }

    /// Set the probe result for inputs named `filename`.
    pub async fn set_probe_result(&self, filename: &str, dimensions: Dimensions) {
        self.probe_results
            .write()
            .await
            .insert(filename.to_string(), dimensions);
    }

    pub async fn set_default_dimensions(&self, dimensions: Dimensions) {
        *self.default_dimensions.write().await = dimensions;
    }

    /// Make every encode of inputs named `filename` fail.
    pub async fn fail_encode(&self, filename: &str) {
        self.failing.write().await.insert(filename.to_string());
    }

    /// Configure the next probe to fail with the given error.
    pub async fn set_next_error(&self, error: ConverterError) {
        *self.next_error.write().await = Some(error);
    }

    /// Set how long each encode takes. The output file is written before
    /// the wait, like a real encoder streaming to disk.
    pub async fn set_encode_delay(&self, delay: Duration) {
        *self.encode_delay_ms.write().await = delay.as_millis() as u64;
    }

    /// Set the size of the files written by encodes.
    pub async fn set_output_size(&self, bytes: usize) {
        *self.output_size.write().await = bytes;
    }

    async fn probe(&self, path: &Path) -> Result<Dimensions, ConverterError> {
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        if !path.exists() {
            return Err(ConverterError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let name = file_name(path);
        if let Some(dims) = self.probe_results.read().await.get(&name) {
            return Ok(*dims);
        }
        Ok(*self.default_dimensions.read().await)
    }

    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        target: Dimensions,
        video: bool,
    ) -> Result<(), ConverterError> {
        self.encodes.write().await.push(RecordedEncode {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            target,
            video,
        });

        let size = *self.output_size.read().await;
        tokio::fs::write(output, vec![0u8; size]).await?;

        let delay = *self.encode_delay_ms.read().await;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.failing.read().await.contains(&file_name(input)) {
            return Err(ConverterError::encode_failed(
                "mock encode failure",
                Some("Invalid data found when processing input".to_string()),
            ));
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl CompressionBackend for MockCompressionBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe_image(&self, path: &Path) -> Result<Dimensions, ConverterError> {
        self.probe(path).await
    }

    async fn encode_image(&self, job: &ImageJob) -> Result<(), ConverterError> {
        self.encode(&job.input, &job.output, job.target, false).await
    }

    async fn probe_video(&self, path: &Path) -> Result<Dimensions, ConverterError> {
        self.probe(path).await
    }

    async fn encode_video(&self, job: &VideoJob) -> Result<(), ConverterError> {
        self.encode(&job.input, &job.output, job.target, true).await
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        Ok(())
    }
}
