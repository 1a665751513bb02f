//! Migration pipeline orchestration.
//!
//! `MigrationPipeline` sequences the four phases over a freshly discovered
//! workload:
//!
//! ```text
//! Idle -> Compressing -> Uploading -> RewritingLinks -> Deleting -> Complete
//!            \______________\_______________\_____________\-> Aborted
//! ```
//!
//! Compression runs one bounded worker group per media kind, upload and
//! deletion run one task per eligible item, and link rewriting is a single
//! sequential pass over the vault's documents. Only items that were both
//! uploaded and had every reference rewritten are deleted.
//!
//! # Example
//!
//! ```ignore
//! let pipeline = MigrationPipeline::new(settings, backend, storage, documents)
//!     .with_events(events_tx);
//! let abort = pipeline.abort_handle();
//! let summary = pipeline.run(Path::new("/home/me/vault")).await?;
//! ```

mod events;
mod runner;
mod types;
mod workers;

pub use runner::{AbortHandle, MigrationPipeline};
pub use types::{
    DeletionError, DocumentStats, ItemRef, PhaseFailures, PipelineError, PipelineEvent,
    PipelineState, RunSummary, StageStatus,
};
