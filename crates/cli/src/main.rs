mod cli;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vaultlift_core::{
    build_storage, discover, load_config, metrics::render_metrics, validate_config,
    CompressionBackend, DocumentStore, FfmpegBackend, FsDocumentStore, LinkRewriter,
    MigrationPipeline, ObjectStorage, PipelineEvent, RunSummary, SanitizedSettings, Settings,
};

use cli::Args;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for the pipeline event channel
const EVENT_BUFFER_SIZE: usize = 1024;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.json_logs);

    if let Err(e) = run(args).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn run(args: Args) -> Result<()> {
    info!("vaultlift {}", VERSION);

    // Load configuration
    info!("Loading configuration from {:?}", args.config);
    let settings = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Validate configuration
    validate_config(&settings).context("Configuration validation failed")?;

    let sanitized = SanitizedSettings::from(&settings);
    info!(
        settings = %serde_json::to_string(&sanitized).unwrap_or_default(),
        "Configuration loaded successfully"
    );

    let vault = resolve_vault(&args, &settings)?;

    if args.dry_run {
        return dry_run(&vault).await;
    }

    migrate(&args, settings, &vault).await
}

fn resolve_vault(args: &Args, settings: &Settings) -> Result<PathBuf> {
    args.vault
        .clone()
        .or_else(|| settings.vault.path.clone())
        .context("No vault given: pass --vault or set vault.path in the configuration")
}

async fn migrate(args: &Args, settings: Settings, vault: &Path) -> Result<()> {
    // Create compression backend
    let backend = Arc::new(FfmpegBackend::new(settings.compression.clone()));
    backend
        .validate()
        .await
        .context("Compression backend is not usable")?;
    info!("Using compression backend: {}", backend.name());

    // Create storage client
    let storage = build_storage(&settings.storage).context("Failed to create storage client")?;
    storage
        .validate()
        .await
        .context("Storage is not usable")?;
    info!("Using storage: {}", storage.name());

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
    let pipeline = MigrationPipeline::new(
        settings,
        backend,
        storage,
        Arc::new(FsDocumentStore::new()),
    )
    .with_events(events_tx);

    let printer = tokio::spawn(print_events(events_rx, args.json));

    // Ctrl+C aborts the run; cleanup happens inside the pipeline.
    let abort = pipeline.abort_handle();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Abort requested, cleaning up");
        abort.abort();
    });

    let result = pipeline.run(vault).await;

    signal_task.abort();
    // Dropping the pipeline closes the event channel so the printer drains.
    drop(pipeline);
    let _ = printer.await;

    if args.metrics {
        print!("{}", render_metrics());
    }

    let summary = result.context("Migration failed")?;
    log_summary(&summary);

    Ok(())
}

async fn print_events(mut rx: mpsc::Receiver<PipelineEvent>, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize event: {}", e),
            }
            continue;
        }

        match event {
            PipelineEvent::Progress { percent } => println!("[{:>3}%]", percent),
            PipelineEvent::Error { message, .. } => eprintln!("error: {}", message),
            PipelineEvent::WorkCompleted => println!("All files migrated, removing originals"),
            _ => {}
        }
    }
}

fn log_summary(summary: &RunSummary) {
    info!(
        items = summary.total_items,
        deleted = summary.deleted,
        bytes_uploaded = summary.bytes_uploaded,
        documents_scanned = summary.documents.scanned,
        documents_changed = summary.documents.changed,
        documents_failed = summary.documents.failed,
        duration_secs = summary.duration_secs(),
        "Migration complete"
    );

    let failures = &summary.failures;
    if failures.total() == 0 {
        return;
    }

    warn!(
        compression = failures.compression,
        upload = failures.upload,
        link_rewrite = failures.link_rewrite,
        deletion = failures.deletion,
        "Some files were not migrated; their originals are still in the vault"
    );
    for item in summary.failed_items() {
        if let Some(err) = item.error() {
            warn!(path = %item.source_path.display(), "{}", err);
        }
    }
}

/// Lists every reference to a vault media file without changing anything.
async fn dry_run(vault: &Path) -> Result<()> {
    let root = vault.to_path_buf();
    let workload = tokio::task::spawn_blocking(move || discover(&root))
        .await
        .context("Discovery task failed")?
        .with_context(|| format!("Failed to scan {:?}", vault))?;

    let rewriter = LinkRewriter::scan_only(workload.iter().map(|i| i.filename.as_str()))
        .context("Failed to build reference patterns")?;

    let store = FsDocumentStore::new();
    let documents = store
        .list_text_documents(vault)
        .await
        .context("Failed to list documents")?;

    let mut references = 0;
    let mut referenced = BTreeSet::new();

    for doc in &documents {
        let content = match store.read(doc).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %doc.display(), error = %e, "Skipping unreadable document");
                continue;
            }
        };

        for found in rewriter.find_references(doc, &content) {
            let line = content[..found.start].matches('\n').count() + 1;
            println!(
                "{}:{}: {} -> {}",
                found.document.display(),
                line,
                found.text,
                found.filename
            );
            references += 1;
            referenced.insert(found.filename);
        }
    }

    let unreferenced = workload
        .iter()
        .filter(|i| !referenced.contains(&i.filename))
        .count();

    info!(
        items = workload.len(),
        bytes = workload.total_bytes(),
        documents = documents.len(),
        references,
        unreferenced,
        "Dry run complete, nothing was changed"
    );

    Ok(())
}

/// Wait for an abort signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
