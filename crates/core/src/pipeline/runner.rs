//! The migration pipeline - drives a vault through the four phases.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::events::EventEmitter;
use super::types::{
    DocumentStats, PhaseFailures, PipelineError, PipelineEvent, PipelineState, RunSummary,
    StageStatus,
};
use super::workers::{compress_group, delete_item, remove_partial, upload_item, CompressionTask};
use crate::compression::{derived_filename, CompressionBackend, CompressionConfig};
use crate::config::Settings;
use crate::links::{DocumentStore, LinkRewriter, LinkTarget, RewriteMap, RewriteOutcome};
use crate::metrics;
use crate::progress::ProgressState;
use crate::storage::ObjectStorage;
use crate::workload::{discover, DiscoveryError, ItemId, MediaKind, Stage, WorkItem, Workload};

/// Marker for a run interrupted by an abort request.
struct Interrupted;

/// Requests that a running pipeline stop.
///
/// Cloneable and usable from any task. An abort requested before `run`
/// takes effect as soon as discovery finishes.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Drives one vault through compression, upload, link rewriting and
/// deletion.
///
/// A pipeline runs at most once. Phases run strictly in order and a phase
/// starts only after every worker of the previous one has finished. Item
/// failures are recorded on the item and reported as events; only
/// discovery failures and aborts end a run early.
pub struct MigrationPipeline<B, S, D>
where
    B: CompressionBackend + ?Sized + 'static,
    S: ObjectStorage + ?Sized + 'static,
    D: DocumentStore + ?Sized + 'static,
{
    settings: Arc<Settings>,
    compression: Arc<CompressionConfig>,
    subfolder: Arc<str>,
    backend: Arc<B>,
    storage: Arc<S>,
    documents: Arc<D>,
    emitter: Arc<EventEmitter>,

    // Runtime state
    started: AtomicBool,
    state_tx: watch::Sender<PipelineState>,
    abort_tx: Arc<watch::Sender<bool>>,
}

impl<B, S, D> MigrationPipeline<B, S, D>
where
    B: CompressionBackend + ?Sized + 'static,
    S: ObjectStorage + ?Sized + 'static,
    D: DocumentStore + ?Sized + 'static,
{
    /// Create a new pipeline.
    pub fn new(settings: Settings, backend: Arc<B>, storage: Arc<S>, documents: Arc<D>) -> Self {
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        let (abort_tx, _) = watch::channel(false);

        Self {
            compression: Arc::new(settings.compression.clone()),
            subfolder: Arc::from(settings.storage.subfolder.as_str()),
            emitter: Arc::new(EventEmitter::new(settings.progress.clone(), None)),
            settings: Arc::new(settings),
            backend,
            storage,
            documents,
            started: AtomicBool::new(false),
            state_tx,
            abort_tx: Arc::new(abort_tx),
        }
    }

    /// Publishes every event of the run on `tx`.
    ///
    /// Delivery applies backpressure: workers wait while the channel is full.
    /// Drain the receiver concurrently with [`run`](Self::run), or give it
    /// room for the whole run, otherwise the run stalls.
    pub fn with_events(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.emitter = Arc::new(EventEmitter::new(self.settings.progress.clone(), Some(tx)));
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> PipelineState {
        *self.state_tx.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: Arc::clone(&self.abort_tx),
        }
    }

    pub async fn progress(&self) -> ProgressState {
        self.emitter.progress().await
    }

    /// Migrates the media of `vault`.
    ///
    /// The workload is discovered fresh. If discovery fails or finds
    /// nothing, the pipeline stays `Idle` and may be run again.
    pub async fn run(&self, vault: &Path) -> Result<RunSummary, PipelineError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::AlreadyStarted(self.state()));
        }

        let started_at = Utc::now();

        let mut workload = match self.discover_workload(vault).await {
            Ok(workload) => workload,
            Err(e) => {
                error!(vault = %vault.display(), error = %e, "Cannot start migration");
                self.started.store(false, Ordering::SeqCst);
                self.emitter.error(e.to_string()).await;
                return Err(e);
            }
        };

        info!(
            vault = %vault.display(),
            items = workload.len(),
            bytes = workload.total_bytes(),
            "Starting migration"
        );
        self.emitter.start(&workload).await;

        let mut abort_rx = self.abort_tx.subscribe();
        let mut derivatives = Vec::new();
        let mut documents = DocumentStats::default();

        let outcome = self
            .drive(vault, &mut workload, &mut derivatives, &mut documents, &mut abort_rx)
            .await;

        if outcome.is_err() {
            return Err(self.finish_aborted(&derivatives).await);
        }

        discard_failed_derivatives(&workload).await;
        self.enter(PipelineState::Complete).await;

        let summary = summarize(vault, started_at, workload, documents);
        info!(
            items = summary.total_items,
            deleted = summary.deleted,
            failed = summary.failures.total(),
            documents_changed = summary.documents.changed,
            duration_secs = summary.duration_secs(),
            "Migration complete"
        );

        self.emitter
            .send(PipelineEvent::AllComplete {
                summary: Box::new(summary.clone()),
            })
            .await;

        Ok(summary)
    }

    async fn discover_workload(&self, vault: &Path) -> Result<Workload, PipelineError> {
        let root = vault.to_path_buf();
        let workload = tokio::task::spawn_blocking(move || discover(&root))
            .await
            .map_err(|e| DiscoveryError::Unreadable {
                path: vault.to_path_buf(),
                source: std::io::Error::other(e),
            })??;

        if workload.is_empty() {
            return Err(PipelineError::EmptyWorkload(vault.to_path_buf()));
        }
        Ok(workload)
    }

    async fn drive(
        &self,
        vault: &Path,
        workload: &mut Workload,
        derivatives: &mut Vec<PathBuf>,
        documents: &mut DocumentStats,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), Interrupted> {
        check_abort(abort_rx)?;
        self.enter(PipelineState::Compressing).await;
        self.compress(workload, derivatives, abort_rx).await?;

        check_abort(abort_rx)?;
        self.enter(PipelineState::Uploading).await;
        self.upload(workload, abort_rx).await?;

        check_abort(abort_rx)?;
        self.enter(PipelineState::RewritingLinks).await;
        self.rewrite_links(vault, workload, documents, abort_rx).await?;

        check_abort(abort_rx)?;
        self.enter(PipelineState::Deleting).await;
        self.delete(workload, abort_rx).await
    }

    async fn enter(&self, state: PipelineState) {
        self.state_tx.send_replace(state);
        debug!(state = %state, "Pipeline state changed");
        self.emitter.send(PipelineEvent::StateChanged { state }).await;
    }

    /// Removes every derivative of the run and reports the abort.
    async fn finish_aborted(&self, derivatives: &[PathBuf]) -> PipelineError {
        let phase = self.state();
        warn!(phase = %phase, derivatives = derivatives.len(), "Migration aborted, cleaning up");

        for path in derivatives {
            remove_partial(path).await;
        }

        self.enter(PipelineState::Aborted).await;
        let error = PipelineError::Aborted { phase };
        self.emitter.error(error.to_string()).await;
        error
    }

    /// Waits for every task in `set`, or aborts them all when requested.
    async fn join_phase<T: Send + 'static>(
        &self,
        mut set: JoinSet<T>,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> Result<Vec<T>, Interrupted> {
        let mut results = Vec::with_capacity(set.len());
        let mut abortable = true;

        loop {
            if *abort_rx.borrow() {
                set.abort_all();
                while set.join_next().await.is_some() {}
                return Err(Interrupted);
            }

            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(Ok(value)) => results.push(value),
                    Some(Err(e)) => error!(error = %e, "Worker task failed"),
                    None => return Ok(results),
                },
                changed = abort_rx.changed(), if abortable => {
                    if changed.is_err() {
                        abortable = false;
                    }
                }
            }
        }
    }

    async fn phase_started(&self, phase: Stage, items: usize) {
        info!(phase = %phase, items, "Phase started");
        self.emitter
            .send(PipelineEvent::PhaseStarted { phase, items })
            .await;
    }

    async fn phase_completed(&self, phase: Stage, workload: &Workload, started: Instant) {
        let succeeded = workload.iter().filter(|i| i.is_stage_done(phase)).count();
        let failed = workload
            .iter()
            .filter(|i| i.error().is_some_and(|e| e.stage == phase))
            .count();
        let elapsed = started.elapsed();

        metrics::PHASE_DURATION
            .with_label_values(&[phase.as_str()])
            .observe(elapsed.as_secs_f64());
        info!(
            phase = %phase,
            succeeded,
            failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Phase completed"
        );

        self.emitter
            .send(PipelineEvent::PhaseCompleted {
                phase,
                succeeded,
                failed,
            })
            .await;
    }

    // =========================================================================
    // Phases
    // =========================================================================

    /// One worker group per media kind present, run concurrently.
    async fn compress(
        &self,
        workload: &mut Workload,
        derivatives: &mut Vec<PathBuf>,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), Interrupted> {
        let started = Instant::now();
        let mut images = Vec::new();
        let mut videos = Vec::new();

        for item in workload.healthy() {
            let output = item
                .source_path
                .with_file_name(derived_filename(&item.filename, item.kind));
            derivatives.push(output.clone());

            let task = CompressionTask {
                item: item.clone(),
                output,
            };
            match item.kind {
                MediaKind::Image => images.push(task),
                MediaKind::Video => videos.push(task),
            }
        }

        self.phase_started(Stage::Compression, images.len() + videos.len())
            .await;

        let groups = [
            (MediaKind::Image, images, self.compression.max_parallel_images),
            (MediaKind::Video, videos, self.compression.max_parallel_videos),
        ];

        let mut set = JoinSet::new();
        for (kind, tasks, bound) in groups {
            if tasks.is_empty() {
                continue;
            }
            set.spawn(compress_group(
                Arc::clone(&self.backend),
                Arc::clone(&self.compression),
                Arc::clone(&self.emitter),
                kind,
                tasks,
                bound,
            ));
        }

        let results = self.join_phase(set, abort_rx).await?;
        for item in results.into_iter().flatten() {
            workload.replace(item);
        }

        self.phase_completed(Stage::Compression, workload, started)
            .await;
        Ok(())
    }

    /// One concurrent upload per item that survived compression.
    async fn upload(
        &self,
        workload: &mut Workload,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), Interrupted> {
        let started = Instant::now();
        let eligible: Vec<WorkItem> = workload.healthy().cloned().collect();
        self.phase_started(Stage::Upload, eligible.len()).await;

        let mut set = JoinSet::new();
        for item in eligible {
            set.spawn(upload_item(
                Arc::clone(&self.storage),
                Arc::clone(&self.emitter),
                Arc::clone(&self.subfolder),
                item,
            ));
        }

        for item in self.join_phase(set, abort_rx).await? {
            workload.replace(item);
        }

        self.phase_completed(Stage::Upload, workload, started).await;
        Ok(())
    }

    /// A single sequential pass over every document.
    ///
    /// Only uploaded items are mapped. An item is marked link-complete once
    /// every document referencing it was rewritten; if a rewritten document
    /// cannot be saved, the items it references fail instead so their
    /// originals are kept.
    async fn rewrite_links(
        &self,
        vault: &Path,
        workload: &mut Workload,
        stats: &mut DocumentStats,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), Interrupted> {
        let started = Instant::now();

        let mut map = RewriteMap::new();
        let mut owners: Vec<ItemId> = Vec::new();
        let mut ambiguous: Vec<ItemId> = Vec::new();

        for item in workload.healthy().filter(|i| i.is_stage_done(Stage::Upload)) {
            let Some(url) = item.public_url.clone() else {
                continue;
            };
            if map.contains_key(&item.filename) {
                ambiguous.push(item.id);
                continue;
            }
            map.insert(
                item.filename.clone(),
                LinkTarget {
                    url,
                    kind: item.kind,
                },
            );
            owners.push(item.id);
        }

        self.phase_started(Stage::LinkRewrite, owners.len() + ambiguous.len())
            .await;

        for id in ambiguous {
            if let Some(item) = workload.get_mut(id) {
                let message = format!(
                    "another file named {} is already mapped; references to it are ambiguous",
                    item.filename
                );
                self.emitter.fail(item, Stage::LinkRewrite, message).await;
            }
        }

        let blocked = match self.rewrite_documents(vault, &map, stats, abort_rx).await? {
            Ok(blocked) => blocked,
            Err(reason) => {
                for &id in &owners {
                    if let Some(item) = workload.get_mut(id) {
                        self.emitter
                            .fail(item, Stage::LinkRewrite, reason.clone())
                            .await;
                    }
                }
                self.phase_completed(Stage::LinkRewrite, workload, started)
                    .await;
                return Ok(());
            }
        };

        for id in owners {
            let Some(item) = workload.get_mut(id) else {
                continue;
            };
            if let Some(count) = blocked.get(&item.filename) {
                let message = format!("references in {} document(s) could not be rewritten", count);
                self.emitter.fail(item, Stage::LinkRewrite, message).await;
            } else if item.mark_stage_done(Stage::LinkRewrite) {
                self.emitter.item(item, StageStatus::LinkComplete).await;
            }
        }

        self.phase_completed(Stage::LinkRewrite, workload, started)
            .await;
        Ok(())
    }

    /// Rewrites every document. Returns, per filename, how many documents
    /// referencing it could not be saved, or the reason no document could be
    /// processed at all.
    async fn rewrite_documents(
        &self,
        vault: &Path,
        map: &RewriteMap,
        stats: &mut DocumentStats,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> Result<Result<BTreeMap<String, usize>, String>, Interrupted> {
        let mut blocked: BTreeMap<String, usize> = BTreeMap::new();
        if map.is_empty() {
            debug!("No uploaded items, skipping document scan");
            return Ok(Ok(blocked));
        }

        let rewriter = match LinkRewriter::new(map) {
            Ok(rewriter) => rewriter,
            Err(e) => {
                self.emitter.error(e.to_string()).await;
                return Ok(Err(e.to_string()));
            }
        };

        let docs = match self.documents.list_text_documents(vault).await {
            Ok(docs) => docs,
            Err(e) => {
                error!(vault = %vault.display(), error = %e, "Cannot list documents");
                self.emitter.error(e.to_string()).await;
                return Ok(Err(format!("documents could not be listed: {}", e)));
            }
        };

        for doc in &docs {
            check_abort(abort_rx)?;
            stats.scanned += 1;

            let content = match self.documents.read(doc).await {
                Ok(content) => content,
                Err(e) => {
                    stats.failed += 1;
                    warn!(path = %doc.display(), error = %e, "Skipping unreadable document");
                    metrics::DOCUMENTS_REWRITTEN.with_label_values(&["failed"]).inc();
                    self.emitter.error(e.to_string()).await;
                    continue;
                }
            };

            match rewriter.rewrite(&content) {
                RewriteOutcome::Unchanged => {
                    debug!(path = %doc.display(), "No changes needed");
                    metrics::DOCUMENTS_REWRITTEN
                        .with_label_values(&["unchanged"])
                        .inc();
                }
                RewriteOutcome::Rewritten {
                    content,
                    references,
                } => match self.documents.write(doc, &content).await {
                    Ok(()) => {
                        stats.changed += 1;
                        info!(
                            path = %doc.display(),
                            references = references.values().sum::<usize>(),
                            "Rewrote references"
                        );
                        metrics::DOCUMENTS_REWRITTEN
                            .with_label_values(&["changed"])
                            .inc();
                    }
                    Err(e) => {
                        stats.failed += 1;
                        error!(path = %doc.display(), error = %e, "Failed to save rewritten document");
                        metrics::DOCUMENTS_REWRITTEN.with_label_values(&["failed"]).inc();
                        self.emitter.error(e.to_string()).await;
                        for name in references.into_keys() {
                            *blocked.entry(name).or_default() += 1;
                        }
                    }
                },
            }
        }

        info!(
            scanned = stats.scanned,
            changed = stats.changed,
            failed = stats.failed,
            "Document scan finished"
        );
        Ok(Ok(blocked))
    }

    /// One concurrent deletion per fully migrated item.
    async fn delete(
        &self,
        workload: &mut Workload,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), Interrupted> {
        let started = Instant::now();
        let eligible: Vec<WorkItem> = workload
            .iter()
            .filter(|i| i.is_deletable())
            .cloned()
            .collect();
        self.phase_started(Stage::Deletion, eligible.len()).await;

        let mut set = JoinSet::new();
        for item in eligible {
            set.spawn(delete_item(Arc::clone(&self.emitter), item));
        }

        for item in self.join_phase(set, abort_rx).await? {
            workload.replace(item);
        }

        self.phase_completed(Stage::Deletion, workload, started).await;
        Ok(())
    }
}

fn check_abort(abort_rx: &watch::Receiver<bool>) -> Result<(), Interrupted> {
    if *abort_rx.borrow() {
        Err(Interrupted)
    } else {
        Ok(())
    }
}

/// Removes the local derivatives of failed items so the next run does not
/// discover them as media.
async fn discard_failed_derivatives(workload: &Workload) {
    let leftovers: Vec<&Path> = workload
        .iter()
        .filter(|item| item.is_errored())
        .filter_map(|item| item.transformed_path.as_deref())
        .collect();
    if leftovers.is_empty() {
        return;
    }

    debug!(count = leftovers.len(), "Removing derivatives of failed items");
    for path in leftovers {
        remove_partial(path).await;
    }
}

fn summarize(
    vault: &Path,
    started_at: DateTime<Utc>,
    workload: Workload,
    documents: DocumentStats,
) -> RunSummary {
    let mut failures = PhaseFailures::default();
    for error in workload.iter().filter_map(|i| i.error()) {
        failures.record(error.stage);
    }

    let deleted = workload
        .iter()
        .filter(|i| i.is_stage_done(Stage::Deletion))
        .count();
    let bytes_uploaded = workload
        .iter()
        .filter(|i| i.is_stage_done(Stage::Upload))
        .map(|i| i.total_bytes)
        .sum();

    RunSummary {
        vault: vault.to_path_buf(),
        started_at,
        finished_at: Utc::now(),
        total_items: workload.len(),
        failures,
        documents,
        deleted,
        bytes_uploaded,
        items: workload.into_items(),
    }
}
