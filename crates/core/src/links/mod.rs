//! Link-rewrite engine.
//!
//! Finds references to migrated media inside markdown documents and points
//! them at the uploaded copies. Two syntaxes are recognised: double-bracket
//! links (`[[name]]`, `![[dir/name#^block|alias]]`) and markdown links
//! (`[label](./dir/name)`, `![alt](name#^block)`).
//!
//! Image references are canonicalised to markdown links to the new URL,
//! keeping the alias (or bracket text) as the label and any block anchor.
//! Video references become an HTML `<video>` player. Documents without a
//! matching reference are left byte-for-byte unchanged.

mod documents;
mod pattern;
mod rewrite;

pub use documents::{DocumentStore, FsDocumentStore, RewriteError};
pub use pattern::{escape_filename, reference_pattern};
pub use rewrite::{
    map_from_urls, video_embed, LinkRewriter, LinkTarget, ReferenceMatch, RewriteMap,
    RewriteOutcome,
};
