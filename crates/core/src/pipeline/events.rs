//! Event fan-out and progress accounting for a run.

use tokio::sync::{mpsc, Mutex};
use tracing::{error, trace};

use super::types::{ItemRef, PipelineEvent, StageStatus};
use crate::metrics;
use crate::progress::{ProgressAccountant, ProgressState, ProgressUpdate, ProgressWeights};
use crate::workload::{Stage, WorkItem, Workload};

/// Feeds item events to the accountant and forwards them, plus any derived
/// progress events, to the subscriber.
///
/// The accountant lock is held while sending so progress events leave in
/// the order they were computed. A full channel therefore blocks every
/// worker until the subscriber catches up.
pub(crate) struct EventEmitter {
    tx: Option<mpsc::Sender<PipelineEvent>>,
    accountant: Mutex<ProgressAccountant>,
}

impl EventEmitter {
    pub fn new(weights: ProgressWeights, tx: Option<mpsc::Sender<PipelineEvent>>) -> Self {
        Self {
            tx,
            accountant: Mutex::new(ProgressAccountant::new(weights)),
        }
    }

    /// Sizes the accountant for a new run.
    pub async fn start(&self, workload: &Workload) {
        self.accountant.lock().await.start(workload.iter());
    }

    pub async fn progress(&self) -> ProgressState {
        self.accountant.lock().await.state()
    }

    pub async fn send(&self, event: PipelineEvent) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(event).await;
        }
    }

    /// Reports an item reaching a stage milestone.
    pub async fn item(&self, item: &WorkItem, status: StageStatus) {
        let mut accountant = self.accountant.lock().await;

        let update = match &status {
            StageStatus::Start => None,
            StageStatus::CompressionComplete => {
                Some(accountant.complete_stage(item.id, Stage::Compression))
            }
            StageStatus::UploadProgress {
                bytes_transferred,
                total_bytes,
            } => {
                trace!(item = %item.id, bytes_transferred, total_bytes, "Upload progress");
                Some(accountant.record_upload_progress(item.id, *bytes_transferred, *total_bytes))
            }
            StageStatus::UploadComplete { .. } => Some(accountant.complete_stage(item.id, Stage::Upload)),
            StageStatus::LinkComplete => Some(accountant.complete_stage(item.id, Stage::LinkRewrite)),
            StageStatus::DeletionComplete => None,
        };

        if let Some(stage) = completed_stage(&status) {
            metrics::ITEMS_TOTAL
                .with_label_values(&[stage.as_str(), "success"])
                .inc();
        }

        self.send(PipelineEvent::Item {
            item: ItemRef::from(item),
            status,
        })
        .await;

        if let Some(update) = update {
            self.send_progress(update).await;
        }
    }

    /// Records a stage failure on the item and reports it. Returns `false`
    /// if the item had already failed, in which case nothing is reported.
    pub async fn fail(&self, item: &mut WorkItem, stage: Stage, message: impl Into<String>) -> bool {
        let message = message.into();
        if !item.fail(stage, message.clone()) {
            return false;
        }

        error!(
            item = %item.id,
            path = %item.source_path.display(),
            stage = %stage,
            error = %message,
            "Item failed"
        );
        metrics::ITEMS_TOTAL
            .with_label_values(&[stage.as_str(), "failed"])
            .inc();

        let mut accountant = self.accountant.lock().await;
        let update = accountant.retire_item(item.id);

        self.send(PipelineEvent::Error {
            message: format!("{}: {} failed: {}", item.filename, stage, message),
            item: Some(item.id),
        })
        .await;
        self.send_progress(update).await;

        true
    }

    /// Reports an error not tied to a single item.
    pub async fn error(&self, message: impl Into<String>) {
        self.send(PipelineEvent::Error {
            message: message.into(),
            item: None,
        })
        .await;
    }

    async fn send_progress(&self, update: ProgressUpdate) {
        if update.changed {
            self.send(PipelineEvent::Progress {
                percent: update.percent,
            })
            .await;
        }
        if update.work_completed {
            self.send(PipelineEvent::WorkCompleted).await;
        }
    }
}

fn completed_stage(status: &StageStatus) -> Option<Stage> {
    match status {
        StageStatus::CompressionComplete => Some(Stage::Compression),
        StageStatus::UploadComplete { .. } => Some(Stage::Upload),
        StageStatus::LinkComplete => Some(Stage::LinkRewrite),
        StageStatus::DeletionComplete => Some(Stage::Deletion),
        StageStatus::Start | StageStatus::UploadProgress { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::MediaKind;

    fn workload() -> Workload {
        let mut workload = Workload::new();
        workload.push("/v/a.png".into(), 1_000_000, MediaKind::Image);
        workload.push("/v/b.mp4".into(), 2_000_000, MediaKind::Video);
        workload
    }

    fn drain(rx: &mut mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_item_event_precedes_progress() {
        let (tx, mut rx) = mpsc::channel(16);
        let emitter = EventEmitter::new(ProgressWeights::default(), Some(tx));
        let workload = workload();
        emitter.start(&workload).await;

        let item = workload.items()[0].clone();
        emitter.item(&item, StageStatus::CompressionComplete).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            PipelineEvent::Item {
                status: StageStatus::CompressionComplete,
                ..
            }
        ));
        assert!(matches!(events[1], PipelineEvent::Progress { percent: 2 }));
    }

    #[tokio::test]
    async fn test_fail_reports_once() {
        let (tx, mut rx) = mpsc::channel(16);
        let emitter = EventEmitter::new(ProgressWeights::default(), Some(tx));
        let workload = workload();
        emitter.start(&workload).await;

        let mut item = workload.items()[1].clone();
        assert!(emitter.fail(&mut item, Stage::Compression, "bad codec").await);
        assert!(!emitter.fail(&mut item, Stage::Upload, "again").await);

        let errors: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::Error { message, item } => Some((message, item)),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "b.mp4: compression failed: bad codec");
        assert_eq!(errors[0].1, Some(item.id));
    }

    #[tokio::test]
    async fn test_without_subscriber() {
        let emitter = EventEmitter::new(ProgressWeights::default(), None);
        let workload = workload();
        emitter.start(&workload).await;
        emitter
            .item(&workload.items()[0], StageStatus::CompressionComplete)
            .await;
        assert_eq!(emitter.progress().await.percent, 2);
    }
}
