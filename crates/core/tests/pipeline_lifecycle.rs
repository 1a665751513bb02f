//! Pipeline lifecycle integration tests.
//!
//! These tests run full migrations over temporary vaults with a mock
//! compression backend and mock storage:
//! - State transitions and run-level errors
//! - Failure isolation per item and per phase
//! - Link rewriting and deletion eligibility
//! - Abort and cleanup

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use vaultlift_core::{
    links::{DocumentStore, FsDocumentStore},
    pipeline::{MigrationPipeline, PipelineError, PipelineEvent, PipelineState, StageStatus},
    storage::StorageError,
    testing::{fixtures, MockCompressionBackend, MockDocumentStore, MockStorage},
    workload::{DiscoveryError, Stage},
};

/// Test helper holding a vault, the mocks and a pipeline wired to them.
struct TestHarness<D: DocumentStore + 'static = FsDocumentStore> {
    vault: TempDir,
    backend: Arc<MockCompressionBackend>,
    storage: Arc<MockStorage>,
    documents: Arc<D>,
    pipeline: MigrationPipeline<MockCompressionBackend, MockStorage, D>,
    events_rx: mpsc::Receiver<PipelineEvent>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_documents(Arc::new(FsDocumentStore::new()))
    }
}

impl<D: DocumentStore + 'static> TestHarness<D> {
    fn with_documents(documents: Arc<D>) -> Self {
        let vault = TempDir::new().expect("Failed to create vault dir");
        let backend = Arc::new(MockCompressionBackend::new());
        let storage = Arc::new(MockStorage::default());
        let (events_tx, events_rx) = mpsc::channel(10_000);

        let pipeline = MigrationPipeline::new(
            fixtures::settings(vault.path()),
            Arc::clone(&backend),
            Arc::clone(&storage),
            Arc::clone(&documents),
        )
        .with_events(events_tx);

        Self {
            vault,
            backend,
            storage,
            documents,
            pipeline,
            events_rx,
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.vault.path().join(rel)
    }

    fn media(&self, rel: &str, bytes: usize) {
        fixtures::write_media(self.vault.path(), rel, bytes);
    }

    fn note(&self, rel: &str, content: &str) {
        fixtures::write_note(self.vault.path(), rel, content);
    }

    fn read_note(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).expect("Failed to read note")
    }

    /// File names currently in the vault, sorted.
    fn vault_files(&self) -> Vec<String> {
        let mut names: Vec<String> = WalkDir::new(self.vault.path())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    async fn run(&self) -> Result<vaultlift_core::RunSummary, PipelineError> {
        self.pipeline.run(self.vault.path()).await
    }

    fn events(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

fn is_derivative(name: &str) -> bool {
    name.len() > 21 && name.as_bytes()[20] == b'_'
}

// =============================================================================
// Run-level Tests
// =============================================================================

#[tokio::test]
async fn test_pipeline_starts_idle() {
    let harness = TestHarness::new();
    assert_eq!(harness.pipeline.state(), PipelineState::Idle);
    assert_eq!(harness.pipeline.progress().await.percent, 0);
}

#[tokio::test]
async fn test_full_migration() {
    let harness = TestHarness::new();
    harness.media("photo.png", 4096);
    harness.media("media/clip.mov", 8192);
    harness.note("daily/today.md", "Look: ![[photo.png|Sunset]]\n\n[[clip.mov]]\n");

    let summary = tokio_test::assert_ok!(harness.run().await);

    assert_eq!(harness.pipeline.state(), PipelineState::Complete);
    assert_eq!(summary.total_items, 2);
    assert_eq!(summary.deleted, 2);
    assert_eq!(summary.failures.total(), 0);
    assert_eq!(summary.documents.scanned, 1);
    assert_eq!(summary.documents.changed, 1);
    assert_eq!(summary.bytes_uploaded, 2048);

    // Originals and derivatives are gone, only the note remains.
    assert_eq!(harness.vault_files(), vec!["today.md"]);

    let note = harness.read_note("daily/today.md");
    assert!(note.starts_with("Look: [Sunset](https://cdn.test/media/obsidian_attachments/"));
    assert!(note.contains(r#"<video src="https://cdn.test/media/obsidian_attachments/"#));
    assert!(note.contains("_clip.mp4\" controls></video>"));
    assert!(!note.contains("[["));

    let uploads = harness.storage.recorded_uploads().await;
    assert_eq!(uploads.len(), 2);
    assert!(uploads
        .iter()
        .all(|u| u.remote_key.starts_with("obsidian_attachments/")));
}

#[tokio::test]
async fn test_state_transitions_in_order() {
    let mut harness = TestHarness::new();
    harness.media("a.jpg", 100);
    let mut state_rx = harness.pipeline.subscribe_state();

    harness.run().await.unwrap();

    let states: Vec<PipelineState> = harness
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::StateChanged { state } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            PipelineState::Compressing,
            PipelineState::Uploading,
            PipelineState::RewritingLinks,
            PipelineState::Deleting,
            PipelineState::Complete,
        ]
    );
    assert!(state_rx.has_changed().unwrap());
    assert_eq!(*state_rx.borrow_and_update(), PipelineState::Complete);
}

#[tokio::test]
async fn test_pipeline_runs_only_once() {
    let harness = TestHarness::new();
    harness.media("a.jpg", 100);

    harness.run().await.unwrap();
    let second = harness.run().await;

    assert!(matches!(
        second,
        Err(PipelineError::AlreadyStarted(PipelineState::Complete))
    ));
}

#[tokio::test]
async fn test_empty_vault_stays_idle() {
    let harness = TestHarness::new();
    harness.note("only.md", "no media here");

    let result = harness.run().await;
    assert!(matches!(result, Err(PipelineError::EmptyWorkload(_))));
    assert_eq!(harness.pipeline.state(), PipelineState::Idle);

    // The pipeline can be started again once there is something to do.
    harness.media("late.png", 10);
    let summary = harness.run().await.unwrap();
    assert_eq!(summary.total_items, 1);
}

#[tokio::test]
async fn test_missing_vault_is_discovery_error() {
    let harness = TestHarness::new();
    let result = harness
        .pipeline
        .run(Path::new("/nonexistent/vaultlift/vault"))
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Discovery(DiscoveryError::RootNotFound { .. }))
    ));
    assert_eq!(harness.pipeline.state(), PipelineState::Idle);
    assert_eq!(harness.backend.encode_count().await, 0);
}

// =============================================================================
// Failure Isolation Tests
// =============================================================================

#[tokio::test]
async fn test_compression_failure_is_isolated() {
    let harness = TestHarness::new();
    harness.media("bad.png", 100);
    harness.media("good.png", 100);
    harness.note("n.md", "![[bad.png]] ![[good.png]]");
    harness.backend.fail_encode("bad.png").await;

    let summary = harness.run().await.unwrap();

    assert_eq!(summary.failures.compression, 1);
    assert_eq!(summary.deleted, 1);
    assert_eq!(harness.storage.upload_count().await, 1);

    // The failed item's original stays, its partial output does not.
    let files = harness.vault_files();
    assert_eq!(files, vec!["bad.png", "n.md"]);

    let note = harness.read_note("n.md");
    assert!(note.starts_with("![[bad.png]] [good.png](https://cdn.test/media/"));

    let failed: Vec<_> = summary.failed_items().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].filename, "bad.png");
    assert_eq!(failed[0].error().unwrap().stage, Stage::Compression);
}

#[tokio::test]
async fn test_upload_failure_excludes_item_from_rewrite_and_deletion() {
    let mut harness = TestHarness::new();
    harness.media("x.png", 100);
    harness.media("y.png", 100);
    harness.note("n.md", "![[x.png]]\n![[y.png]]\n");
    harness
        .storage
        .fail_upload("_x.jpg", StorageError::Forbidden("bucket policy".to_string()))
        .await;

    let summary = harness.run().await.unwrap();
    assert_eq!(harness.pipeline.state(), PipelineState::Complete);
    assert_eq!(summary.failures.upload, 1);
    assert_eq!(summary.deleted, 1);

    let note = harness.read_note("n.md");
    assert!(note.starts_with("![[x.png]]\n[y.png](https://cdn.test/media/"));
    assert!(harness.path("x.png").exists());
    assert!(!harness.path("y.png").exists());

    // The failed item's derivative must not be picked up by the next run.
    assert!(!harness.vault_files().iter().any(|f| is_derivative(f)));
    assert_eq!(harness.vault_files(), vec!["n.md", "x.png"]);

    let errors: Vec<String> = harness
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::Error { message, item: Some(_) } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("x.png: upload failed:"));
    assert!(errors[0].contains("check storage credentials"));
}

#[tokio::test]
async fn test_document_write_failure_keeps_referenced_originals() {
    let documents = Arc::new(MockDocumentStore::new());
    let harness = TestHarness::with_documents(Arc::clone(&documents));
    harness.media("kept.png", 100);
    harness.media("moved.png", 100);

    let locked = harness.path("locked.md");
    let open = harness.path("open.md");
    documents.insert(&locked, "![[kept.png]]").await;
    documents.insert(&open, "![[moved.png]] and ![[kept.png]]").await;
    documents.fail_write(&locked).await;

    let summary = harness.run().await.unwrap();

    assert_eq!(summary.documents.scanned, 2);
    assert_eq!(summary.documents.changed, 1);
    assert_eq!(summary.documents.failed, 1);
    assert_eq!(summary.failures.link_rewrite, 1);
    assert!(harness.path("kept.png").exists());
    assert!(!harness.path("moved.png").exists());
    assert_eq!(harness.documents.recorded_writes().await, vec![open.clone()]);
    assert_eq!(harness.vault_files(), vec!["kept.png"]);
}

#[tokio::test]
async fn test_unreadable_document_is_skipped() {
    let documents = Arc::new(MockDocumentStore::new());
    let harness = TestHarness::with_documents(Arc::clone(&documents));
    harness.media("pic.gif", 100);

    let broken = harness.path("broken.md");
    let fine = harness.path("fine.md");
    documents.insert(&broken, "![[pic.gif]]").await;
    documents.insert(&fine, "![[pic.gif]]").await;
    documents.fail_read(&broken).await;

    let summary = harness.run().await.unwrap();

    assert_eq!(summary.documents.failed, 1);
    assert_eq!(summary.documents.changed, 1);
    assert_eq!(summary.failures.total(), 0);
    assert_eq!(summary.deleted, 1);
    assert!(documents
        .content(&fine)
        .await
        .unwrap()
        .starts_with("[pic.gif](https://cdn.test/media/"));
}

#[tokio::test]
async fn test_unlistable_documents_fail_mapped_items() {
    let documents = Arc::new(MockDocumentStore::new());
    let harness = TestHarness::with_documents(Arc::clone(&documents));
    harness.media("pic.png", 100);
    documents.fail_listing().await;

    let summary = harness.run().await.unwrap();

    assert_eq!(summary.failures.link_rewrite, 1);
    assert_eq!(summary.deleted, 0);
    assert!(harness.path("pic.png").exists());
    assert_eq!(harness.vault_files(), vec!["pic.png"]);
}

#[tokio::test]
async fn test_duplicate_filenames_keep_later_copy() {
    let harness = TestHarness::new();
    harness.media("a/same.png", 100);
    harness.media("b/same.png", 100);
    harness.note("n.md", "![[same.png]]");

    let summary = harness.run().await.unwrap();

    assert_eq!(summary.failures.link_rewrite, 1);
    assert_eq!(summary.deleted, 1);
    assert!(!harness.path("a/same.png").exists());
    assert!(harness.path("b/same.png").exists());
    assert_eq!(harness.vault_files(), vec!["n.md", "same.png"]);
}

#[tokio::test]
async fn test_second_run_after_failures_finds_only_originals() {
    let harness = TestHarness::new();
    harness.media("x.png", 100);
    harness.note("n.md", "![[x.png]]");
    harness
        .storage
        .fail_upload("_x.jpg", StorageError::Forbidden("bucket policy".to_string()))
        .await;
    harness.run().await.unwrap();

    let rerun = MigrationPipeline::new(
        fixtures::settings(harness.vault.path()),
        Arc::new(MockCompressionBackend::new()),
        Arc::new(MockStorage::default()),
        Arc::new(FsDocumentStore::new()),
    );
    let summary = rerun.run(harness.vault.path()).await.unwrap();

    assert_eq!(summary.total_items, 1);
    assert_eq!(summary.deleted, 1);
    assert_eq!(harness.vault_files(), vec!["n.md"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_files_behind_symlinks_are_never_deleted() {
    let harness = TestHarness::new();
    let outside = TempDir::new().unwrap();
    fixtures::write_media(outside.path(), "precious.png", 100);
    std::os::unix::fs::symlink(outside.path(), harness.path("linked")).unwrap();
    harness.note("n.md", "hello");

    let result = harness.run().await;
    assert!(matches!(result, Err(PipelineError::EmptyWorkload(_))));
    assert!(outside.path().join("precious.png").exists());

    harness.media("inside.png", 100);
    harness.note("n.md", "![[inside.png]] ![[precious.png]]");
    let summary = harness.run().await.unwrap();

    assert_eq!(summary.total_items, 1);
    assert_eq!(harness.storage.upload_count().await, 1);
    assert!(outside.path().join("precious.png").exists());
    assert!(!harness.path("inside.png").exists());
}

// =============================================================================
// Compression Tests
// =============================================================================

#[tokio::test]
async fn test_compression_targets() {
    let harness = TestHarness::new();
    harness.media("big.jpg", 100);
    harness.media("movie.webm", 100);
    harness
        .backend
        .set_probe_result("big.jpg", vaultlift_core::compression::Dimensions::new(4000, 3000))
        .await;

    harness.run().await.unwrap();

    let encodes = harness.backend.recorded_encodes().await;
    assert_eq!(encodes.len(), 2);

    let image = encodes.iter().find(|e| !e.video).unwrap();
    assert_eq!(image.target.width, 1280);
    assert_eq!(image.target.height, 960);
    assert!(image.output.to_string_lossy().ends_with("_big.jpg"));

    let video = encodes.iter().find(|e| e.video).unwrap();
    assert_eq!((video.target.width, video.target.height), (1080, 606));
    assert!(video.output.to_string_lossy().ends_with("_movie.mp4"));
    assert_eq!(video.output.parent(), Some(harness.vault.path().canonicalize().unwrap().as_path()));
}

// =============================================================================
// Progress and Event Tests
// =============================================================================

#[tokio::test]
async fn test_progress_is_monotonic_and_completes() {
    let mut harness = TestHarness::new();
    harness.media("one.png", 1000);
    harness.media("two.mp4", 5000);
    harness.media("three.png", 1000);
    harness.backend.fail_encode("three.png").await;

    harness.run().await.unwrap();
    let events = harness.events();

    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));

    let completed = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::WorkCompleted))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(harness.pipeline.progress().await.percent, 100);

    assert!(matches!(events.last(), Some(PipelineEvent::AllComplete { .. })));
}

#[tokio::test]
async fn test_small_event_channel_drained_concurrently() {
    let vault = TempDir::new().unwrap();
    for i in 0..8 {
        fixtures::write_media(vault.path(), &format!("p{}.png", i), 100);
    }
    fixtures::write_note(vault.path(), "n.md", "![[p0.png]]");

    let (tx, mut rx) = mpsc::channel(1);
    let pipeline = MigrationPipeline::new(
        fixtures::settings(vault.path()),
        Arc::new(MockCompressionBackend::new()),
        Arc::new(MockStorage::default()),
        Arc::new(FsDocumentStore::new()),
    )
    .with_events(tx);

    let drain = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(event) = rx.recv().await {
            count += 1;
            if matches!(event, PipelineEvent::AllComplete { .. }) {
                return (count, true);
            }
        }
        (count, false)
    });

    let summary = tokio::time::timeout(Duration::from_secs(10), pipeline.run(vault.path()))
        .await
        .expect("run stalled on a full event channel")
        .unwrap();
    assert_eq!(summary.deleted, 8);

    let (count, finished) = drain.await.unwrap();
    assert!(finished);
    assert!(count > 8);
}

#[tokio::test]
async fn test_item_events_follow_stage_order() {
    let mut harness = TestHarness::new();
    harness.media("a.png", 100);
    harness.note("n.md", "![[a.png]]");

    harness.run().await.unwrap();

    let statuses: Vec<&'static str> = harness
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::Item { status, .. } => Some(match status {
                StageStatus::Start => "start",
                StageStatus::CompressionComplete => "compressed",
                StageStatus::UploadProgress { .. } => "progress",
                StageStatus::UploadComplete { .. } => "uploaded",
                StageStatus::LinkComplete => "linked",
                StageStatus::DeletionComplete => "deleted",
            }),
            _ => None,
        })
        .filter(|s| *s != "progress")
        .collect();

    assert_eq!(
        statuses,
        vec!["start", "compressed", "uploaded", "linked", "deleted"]
    );
}

// =============================================================================
// Abort Tests
// =============================================================================

#[tokio::test]
async fn test_abort_during_compression_cleans_up() {
    let harness = TestHarness::new();
    harness.media("a.png", 100);
    harness.media("b.mov", 100);
    harness.note("n.md", "![[a.png]]");
    harness.backend.set_encode_delay(Duration::from_secs(30)).await;

    let abort = harness.pipeline.abort_handle();
    let (result, _) = tokio::join!(harness.run(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        abort.abort();
    });

    assert!(matches!(
        result,
        Err(PipelineError::Aborted {
            phase: PipelineState::Compressing
        })
    ));
    assert_eq!(harness.pipeline.state(), PipelineState::Aborted);
    assert_eq!(harness.storage.upload_count().await, 0);

    // Originals and notes untouched, no derivative left behind.
    let files = harness.vault_files();
    assert_eq!(files, vec!["a.png", "b.mov", "n.md"]);
    assert!(!files.iter().any(|f| is_derivative(f)));
    assert_eq!(harness.read_note("n.md"), "![[a.png]]");
}

#[tokio::test]
async fn test_abort_during_upload() {
    let harness = TestHarness::new();
    harness.media("a.png", 100);
    harness.storage.set_upload_delay(Duration::from_secs(30)).await;

    let abort = harness.pipeline.abort_handle();
    let mut state_rx = harness.pipeline.subscribe_state();
    let (result, _) = tokio::join!(harness.run(), async {
        while *state_rx.borrow_and_update() != PipelineState::Uploading {
            if state_rx.changed().await.is_err() {
                return;
            }
        }
        abort.abort();
    });

    assert!(matches!(
        result,
        Err(PipelineError::Aborted {
            phase: PipelineState::Uploading
        })
    ));
    assert_eq!(harness.vault_files(), vec!["a.png"]);
}

#[tokio::test]
async fn test_abort_before_run() {
    let harness = TestHarness::new();
    harness.media("a.png", 100);

    let abort = harness.pipeline.abort_handle();
    abort.abort();
    assert!(abort.is_aborted());

    let result = harness.run().await;
    assert!(matches!(result, Err(PipelineError::Aborted { .. })));
    assert_eq!(harness.backend.encode_count().await, 0);
    assert!(harness.path("a.png").exists());
}
