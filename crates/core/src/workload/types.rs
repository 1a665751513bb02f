//! Types for the workload module.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Image extensions, matched case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpeg", "jpg", "png", "gif", "bmp", "tiff", "tif", "webp", "heif", "heic", "svg",
];

/// Video extensions, matched case-insensitively.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "flv", "wmv", "m4v", "webm", "mpeg", "3gp", "ogv",
];

/// Text document extensions scanned by the link-rewrite phase.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["md", "markdown"];

/// Kind of media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classifies a bare extension (no dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }

    /// Classifies a path or filename by its extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Extension of the compressed derivative.
    pub fn output_extension(&self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of an item in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub usize);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pipeline stage an item can complete or fail in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Compression,
    Upload,
    LinkRewrite,
    Deletion,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compression => "compression",
            Self::Upload => "upload",
            Self::LinkRewrite => "link_rewrite",
            Self::Deletion => "deletion",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure recorded on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

/// One discovered media file and its state across phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    /// Absolute path of the original file.
    pub source_path: PathBuf,
    /// File name of the original, as referenced from documents.
    pub filename: String,
    pub size_bytes: u64,
    pub kind: MediaKind,

    /// Compressed derivative, set by the compression phase.
    pub transformed_path: Option<PathBuf>,
    pub transformed_filename: Option<String>,
    /// Set by the upload phase.
    pub public_url: Option<String>,

    /// Upload telemetry.
    pub bytes_transferred: u64,
    pub total_bytes: u64,

    compression_done: bool,
    upload_done: bool,
    link_done: bool,
    deletion_done: bool,
    error: Option<StageError>,
}

impl WorkItem {
    pub fn new(id: ItemId, source_path: PathBuf, size_bytes: u64, kind: MediaKind) -> Self {
        let filename = source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            id,
            source_path,
            filename,
            size_bytes,
            kind,
            transformed_path: None,
            transformed_filename: None,
            public_url: None,
            bytes_transferred: 0,
            total_bytes: size_bytes,
            compression_done: false,
            upload_done: false,
            link_done: false,
            deletion_done: false,
            error: None,
        }
    }

    /// Whether a phase failed for this item. Errored items are skipped by
    /// every later phase.
    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&StageError> {
        self.error.as_ref()
    }

    /// Records a failure. Only the first failure is kept; returns whether
    /// this call set it.
    pub fn fail(&mut self, stage: Stage, message: impl Into<String>) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(StageError {
            stage,
            message: message.into(),
        });
        true
    }

    pub fn is_stage_done(&self, stage: Stage) -> bool {
        match stage {
            Stage::Compression => self.compression_done,
            Stage::Upload => self.upload_done,
            Stage::LinkRewrite => self.link_done,
            Stage::Deletion => self.deletion_done,
        }
    }

    /// Marks a stage complete. Returns `false` if it was already marked.
    pub fn mark_stage_done(&mut self, stage: Stage) -> bool {
        let flag = match stage {
            Stage::Compression => &mut self.compression_done,
            Stage::Upload => &mut self.upload_done,
            Stage::LinkRewrite => &mut self.link_done,
            Stage::Deletion => &mut self.deletion_done,
        };
        !std::mem::replace(flag, true)
    }

    /// File that gets uploaded: the derivative, or the original when no
    /// compression happened.
    pub fn upload_path(&self) -> &Path {
        self.transformed_path.as_deref().unwrap_or(&self.source_path)
    }

    /// Object name used for the upload.
    pub fn upload_name(&self) -> &str {
        self.transformed_filename
            .as_deref()
            .unwrap_or(self.filename.as_str())
    }

    pub fn record_upload_progress(&mut self, bytes_transferred: u64, total_bytes: u64) {
        self.bytes_transferred = bytes_transferred.min(total_bytes);
        self.total_bytes = total_bytes;
    }

    /// Eligible for deletion: uploaded and every reference rewritten, with
    /// no failure on record.
    pub fn is_deletable(&self) -> bool {
        !self.is_errored() && self.upload_done && self.link_done
    }
}

/// Ordered collection of work items, keyed by source path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Workload {
    items: Vec<WorkItem>,
    #[serde(skip)]
    paths: HashSet<PathBuf>,
}

impl Workload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a file. Returns `None` if the path is already present.
    pub fn push(&mut self, source_path: PathBuf, size_bytes: u64, kind: MediaKind) -> Option<ItemId> {
        if !self.paths.insert(source_path.clone()) {
            return None;
        }
        let id = ItemId(self.items.len());
        self.items.push(WorkItem::new(id, source_path, size_bytes, kind));
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&WorkItem> {
        self.items.get(id.0)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut WorkItem> {
        self.items.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkItem> {
        self.items.iter_mut()
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<WorkItem> {
        self.items
    }

    /// Puts back an item a worker returned. Unknown ids are ignored.
    pub fn replace(&mut self, item: WorkItem) {
        if let Some(slot) = self.items.get_mut(item.id.0) {
            *slot = item;
        }
    }

    /// Items no phase has failed yet.
    pub fn healthy(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter().filter(|i| !i.is_errored())
    }

    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size_bytes).sum()
    }
}
