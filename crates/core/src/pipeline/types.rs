//! Types for the pipeline module.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::workload::{DiscoveryError, ItemId, Stage, WorkItem};

/// Lifecycle of a pipeline run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Compressing,
    Uploading,
    RewritingLinks,
    Deleting,
    Complete,
    Aborted,
}

impl PipelineState {
    /// The phase this state runs, if any.
    pub fn phase(&self) -> Option<Stage> {
        match self {
            Self::Compressing => Some(Stage::Compression),
            Self::Uploading => Some(Stage::Upload),
            Self::RewritingLinks => Some(Stage::LinkRewrite),
            Self::Deleting => Some(Stage::Deletion),
            Self::Idle | Self::Complete | Self::Aborted => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Compressing => "compressing",
            Self::Uploading => "uploading",
            Self::RewritingLinks => "rewriting_links",
            Self::Deleting => "deleting",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies an item in events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRef {
    pub id: ItemId,
    pub filename: String,
}

impl From<&WorkItem> for ItemRef {
    fn from(item: &WorkItem) -> Self {
        Self {
            id: item.id,
            filename: item.filename.clone(),
        }
    }
}

/// Per-item progress through the stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Start,
    CompressionComplete,
    UploadProgress {
        bytes_transferred: u64,
        total_bytes: u64,
    },
    UploadComplete {
        public_url: String,
    },
    LinkComplete,
    DeletionComplete,
}

/// Everything a presentation layer can observe about a run.
///
/// Events for one item arrive in stage order. Events of different items
/// interleave freely.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StateChanged {
        state: PipelineState,
    },
    PhaseStarted {
        phase: Stage,
        items: usize,
    },
    Item {
        item: ItemRef,
        #[serde(flatten)]
        status: StageStatus,
    },
    /// Overall percentage moved.
    Progress {
        percent: u8,
    },
    /// Fires once, the first time progress reaches 100%.
    WorkCompleted,
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        item: Option<ItemId>,
    },
    PhaseCompleted {
        phase: Stage,
        succeeded: usize,
        failed: usize,
    },
    AllComplete {
        summary: Box<RunSummary>,
    },
}

/// Failed item counts per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseFailures {
    pub compression: usize,
    pub upload: usize,
    pub link_rewrite: usize,
    pub deletion: usize,
}

impl PhaseFailures {
    pub fn record(&mut self, stage: Stage) {
        match stage {
            Stage::Compression => self.compression += 1,
            Stage::Upload => self.upload += 1,
            Stage::LinkRewrite => self.link_rewrite += 1,
            Stage::Deletion => self.deletion += 1,
        }
    }

    pub fn get(&self, stage: Stage) -> usize {
        match stage {
            Stage::Compression => self.compression,
            Stage::Upload => self.upload,
            Stage::LinkRewrite => self.link_rewrite,
            Stage::Deletion => self.deletion,
        }
    }

    pub fn total(&self) -> usize {
        self.compression + self.upload + self.link_rewrite + self.deletion
    }
}

/// Document counts from the link-rewrite phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DocumentStats {
    pub scanned: usize,
    pub changed: usize,
    pub failed: usize,
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub vault: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_items: usize,
    pub failures: PhaseFailures,
    pub documents: DocumentStats,
    /// Items migrated and removed from the vault.
    pub deleted: usize,
    pub bytes_uploaded: u64,
    pub items: Vec<WorkItem>,
}

impl RunSummary {
    /// Items left on disk because some phase failed for them.
    pub fn failed_items(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter().filter(|i| i.is_errored())
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Run-level errors. Item failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The vault could not be read.
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Nothing to migrate.
    #[error("No media files found in {0}")]
    EmptyWorkload(PathBuf),

    /// The pipeline already ran or is running.
    #[error("Pipeline already started (state: {0})")]
    AlreadyStarted(PipelineState),

    /// The caller aborted the run.
    #[error("Pipeline aborted during {phase}")]
    Aborted { phase: PipelineState },
}

/// Failure to remove a migrated file.
#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("Failed to remove {path}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
