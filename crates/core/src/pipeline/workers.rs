//! Per-item workers for the compression, upload and deletion phases.
//!
//! Each worker owns a clone of its item for the duration of the phase and
//! hands it back when done. Failures are recorded on the item and never
//! escape the worker.

use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::EventEmitter;
use super::types::{DeletionError, StageStatus};
use crate::compression::{CompressionBackend, CompressionConfig, ConverterError, ImageJob, VideoJob};
use crate::metrics;
use crate::storage::{remote_key, ObjectStorage};
use crate::workload::{MediaKind, Stage, WorkItem};

/// Capacity of the per-upload progress channel. Updates beyond it are
/// dropped by the storage client and superseded by later ones.
const UPLOAD_PROGRESS_BUFFER: usize = 16;

/// An item paired with the path its derivative will be written to.
#[derive(Debug, Clone)]
pub(crate) struct CompressionTask {
    pub item: WorkItem,
    pub output: PathBuf,
}

/// Runs `work`, turning a panic into a stage failure on `fallback`.
async fn isolate<F>(emitter: &EventEmitter, mut fallback: WorkItem, stage: Stage, work: F) -> WorkItem
where
    F: Future<Output = WorkItem>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(item) => item,
        Err(_) => {
            emitter.fail(&mut fallback, stage, "worker panicked").await;
            fallback
        }
    }
}

// =============================================================================
// Compression
// =============================================================================

/// Compresses one kind's items with at most `bound` encodes in flight.
pub(crate) async fn compress_group<B>(
    backend: Arc<B>,
    config: Arc<CompressionConfig>,
    emitter: Arc<EventEmitter>,
    kind: MediaKind,
    tasks: Vec<CompressionTask>,
    bound: usize,
) -> Vec<WorkItem>
where
    B: CompressionBackend + ?Sized,
{
    info!(kind = %kind, items = tasks.len(), bound, "Compression group started");

    let backend = &*backend;
    let config = &*config;
    let emitter = &*emitter;

    let items: Vec<WorkItem> = futures::stream::iter(tasks)
        .map(move |task| {
            let fallback = task.item.clone();
            isolate(
                emitter,
                fallback,
                Stage::Compression,
                compress_item(backend, config, emitter, task),
            )
        })
        .buffer_unordered(bound.max(1))
        .collect()
        .await;

    info!(kind = %kind, items = items.len(), "Compression group finished");
    items
}

async fn compress_item<B>(
    backend: &B,
    config: &CompressionConfig,
    emitter: &EventEmitter,
    task: CompressionTask,
) -> WorkItem
where
    B: CompressionBackend + ?Sized,
{
    let CompressionTask { mut item, output } = task;
    emitter.item(&item, StageStatus::Start).await;

    let result = match transform(backend, config, &item, &output).await {
        Ok(()) => tokio::fs::metadata(&output)
            .await
            .map(|meta| meta.len())
            .map_err(ConverterError::from),
        Err(e) => Err(e),
    };

    match result {
        Ok(size) => {
            debug!(
                item = %item.id,
                output = %output.display(),
                original_bytes = item.size_bytes,
                compressed_bytes = size,
                "Compressed"
            );
            item.transformed_filename = output.file_name().map(|n| n.to_string_lossy().to_string());
            item.transformed_path = Some(output);
            item.record_upload_progress(0, size);
            if item.mark_stage_done(Stage::Compression) {
                emitter.item(&item, StageStatus::CompressionComplete).await;
            }
        }
        Err(e) => {
            remove_partial(&output).await;
            emitter.fail(&mut item, Stage::Compression, e.detail()).await;
        }
    }

    item
}

async fn transform<B>(
    backend: &B,
    config: &CompressionConfig,
    item: &WorkItem,
    output: &Path,
) -> Result<(), ConverterError>
where
    B: CompressionBackend + ?Sized,
{
    match item.kind {
        MediaKind::Image => {
            let source = backend.probe_image(&item.source_path).await?;
            let job = ImageJob {
                input: item.source_path.clone(),
                output: output.to_path_buf(),
                target: source.fit_within(config.image_max_dimension),
                quality: config.image_quality,
            };
            debug!(item = %item.id, from = %source, to = %job.target, "Encoding image");
            backend.encode_image(&job).await
        }
        MediaKind::Video => {
            let source = backend.probe_video(&item.source_path).await?;
            let job = VideoJob {
                input: item.source_path.clone(),
                output: output.to_path_buf(),
                target: source.fit_within(config.video_max_dimension).to_even(),
                crf: config.video_crf,
                audio_bitrate_kbps: config.video_audio_bitrate_kbps,
            };
            debug!(item = %item.id, from = %source, to = %job.target, "Encoding video");
            backend.encode_video(&job).await
        }
    }
}

/// Removes a derivative, tolerating its absence.
pub(crate) async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed derivative"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove derivative"),
    }
}

// =============================================================================
// Upload
// =============================================================================

/// Uploads one item and records its public URL.
pub(crate) async fn upload_item<S>(
    storage: Arc<S>,
    emitter: Arc<EventEmitter>,
    subfolder: Arc<str>,
    item: WorkItem,
) -> WorkItem
where
    S: ObjectStorage + ?Sized,
{
    let fallback = item.clone();
    isolate(
        &emitter,
        fallback,
        Stage::Upload,
        upload_inner(&*storage, &emitter, &subfolder, item),
    )
    .await
}

async fn upload_inner<S>(
    storage: &S,
    emitter: &EventEmitter,
    subfolder: &str,
    mut item: WorkItem,
) -> WorkItem
where
    S: ObjectStorage + ?Sized,
{
    let path = item.upload_path().to_path_buf();
    let key = remote_key(subfolder, item.upload_name());
    let total = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta.len(),
        Err(_) => item.total_bytes,
    };
    item.record_upload_progress(0, total);

    debug!(item = %item.id, key = %key, bytes = total, "Uploading");

    let (tx, mut rx) = mpsc::channel::<u64>(UPLOAD_PROGRESS_BUFFER);
    let upload = storage.upload(&path, &key, Some(tx));
    tokio::pin!(upload);

    // The sender may outlive the upload call inside the transport, so the
    // loop ends on the upload result rather than on channel close.
    let result = loop {
        tokio::select! {
            biased;
            Some(bytes) = rx.recv() => {
                report_upload_progress(emitter, &mut item, bytes, total).await;
            }
            result = &mut upload => break result,
        }
    };
    while let Ok(bytes) = rx.try_recv() {
        report_upload_progress(emitter, &mut item, bytes, total).await;
    }

    match result {
        Ok(url) => {
            item.record_upload_progress(total, total);
            item.public_url = Some(url.clone());
            metrics::UPLOAD_BYTES.inc_by(total);
            info!(item = %item.id, url = %url, "Uploaded");
            if item.mark_stage_done(Stage::Upload) {
                emitter
                    .item(&item, StageStatus::UploadComplete { public_url: url })
                    .await;
            }
        }
        Err(e) => {
            let message = if e.is_credential_error() {
                format!("{} (check storage credentials)", e)
            } else {
                e.to_string()
            };
            emitter.fail(&mut item, Stage::Upload, message).await;
        }
    }

    item
}

async fn report_upload_progress(emitter: &EventEmitter, item: &mut WorkItem, bytes: u64, total: u64) {
    if bytes <= item.bytes_transferred {
        return;
    }
    item.record_upload_progress(bytes, total);
    emitter
        .item(
            item,
            StageStatus::UploadProgress {
                bytes_transferred: item.bytes_transferred,
                total_bytes: total,
            },
        )
        .await;
}

// =============================================================================
// Deletion
// =============================================================================

/// Removes the derivative and the original of a fully migrated item.
pub(crate) async fn delete_item(emitter: Arc<EventEmitter>, item: WorkItem) -> WorkItem {
    let fallback = item.clone();
    isolate(&emitter, fallback, Stage::Deletion, delete_inner(&emitter, item)).await
}

async fn delete_inner(emitter: &EventEmitter, mut item: WorkItem) -> WorkItem {
    let paths: Vec<PathBuf> = item
        .transformed_path
        .iter()
        .cloned()
        .chain(std::iter::once(item.source_path.clone()))
        .collect();

    for path in paths {
        if let Err(e) = remove_file(&path).await {
            let message = format!("{}: {}", e, source_message(&e));
            emitter.fail(&mut item, Stage::Deletion, message).await;
            return item;
        }
    }

    debug!(item = %item.id, path = %item.source_path.display(), "Deleted");
    if item.mark_stage_done(Stage::Deletion) {
        emitter.item(&item, StageStatus::DeletionComplete).await;
    }
    item
}

async fn remove_file(path: &Path) -> Result<(), DeletionError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DeletionError::RemoveFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn source_message(e: &DeletionError) -> String {
    match e {
        DeletionError::RemoveFailed { source, .. } => source.to_string(),
    }
}
