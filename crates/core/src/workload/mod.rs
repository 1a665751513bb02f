//! Workload model and discovery.
//!
//! A [`Workload`] is the ordered set of media files found in a vault. Each
//! [`WorkItem`] carries its identity (path, name, size, kind), the paths and
//! URL produced by later phases, per-stage completion flags and at most one
//! stage-tagged error.
//!
//! Discovery walks the vault once per run. Markdown documents are classified
//! separately and listed through [`list_documents`]; they never become work
//! items.

mod discovery;
mod types;

pub use discovery::{classify, discover, list_documents, DiscoveryError, FileClass};
pub use types::{
    ItemId, MediaKind, Stage, StageError, WorkItem, Workload, DOCUMENT_EXTENSIONS,
    IMAGE_EXTENSIONS, VIDEO_EXTENSIONS,
};
