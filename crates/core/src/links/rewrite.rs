//! Reference rewriting.

use regex_lite::{Captures, Regex};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::documents::RewriteError;
use super::pattern::reference_pattern;
use crate::workload::MediaKind;

/// Where a migrated file now lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkTarget {
    pub url: String,
    pub kind: MediaKind,
}

/// Original filename to new location.
pub type RewriteMap = BTreeMap<String, LinkTarget>;

/// Builds a map from bare URLs, inferring the kind from the filename.
/// Names that are neither image nor video are treated as images.
pub fn map_from_urls<I, K, V>(entries: I) -> RewriteMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    entries
        .into_iter()
        .map(|(name, url)| {
            let name = name.into();
            let kind = MediaKind::from_path(&name).unwrap_or(MediaKind::Image);
            (
                name,
                LinkTarget {
                    url: url.into(),
                    kind,
                },
            )
        })
        .collect()
}

/// One reference found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceMatch {
    pub document: PathBuf,
    /// Byte offsets into the document.
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// Filename the reference points at.
    pub filename: String,
}

/// Result of rewriting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Nothing referenced a mapped file. The document is untouched.
    Unchanged,
    Rewritten {
        content: String,
        /// Filenames that were referenced, with their reference counts.
        references: BTreeMap<String, usize>,
    },
}

impl RewriteOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Rewritten { .. })
    }

    /// Filenames referenced by the document.
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        let references = match self {
            Self::Rewritten { references, .. } => Some(references),
            Self::Unchanged => None,
        };
        references
            .into_iter()
            .flat_map(|r| r.keys().map(String::as_str))
    }
}

struct Entry {
    filename: String,
    pattern: Regex,
    target: Option<LinkTarget>,
}

/// Finds and rewrites references to a set of filenames.
pub struct LinkRewriter {
    entries: Vec<Entry>,
}

impl LinkRewriter {
    /// Compiles one pattern per mapped filename.
    pub fn new(map: &RewriteMap) -> Result<Self, RewriteError> {
        let entries = map
            .iter()
            .map(|(filename, target)| {
                Ok(Entry {
                    filename: filename.clone(),
                    pattern: compile(filename)?,
                    target: Some(target.clone()),
                })
            })
            .collect::<Result<Vec<_>, RewriteError>>()?;
        Ok(Self { entries })
    }

    /// A rewriter that can only scan, for reporting references without
    /// touching anything.
    pub fn scan_only<I, S>(filenames: I) -> Result<Self, RewriteError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique: BTreeSet<String> = filenames
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let entries = unique
            .into_iter()
            .map(|filename| {
                Ok(Entry {
                    pattern: compile(&filename)?,
                    filename,
                    target: None,
                })
            })
            .collect::<Result<Vec<_>, RewriteError>>()?;
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lists every reference in `content`, ordered by position.
    pub fn find_references(&self, document: &Path, content: &str) -> Vec<ReferenceMatch> {
        let mut found: Vec<ReferenceMatch> = Vec::new();
        let mut seen = BTreeSet::new();

        for entry in &self.entries {
            for m in entry.pattern.find_iter(content) {
                if seen.insert((m.start(), m.end())) {
                    found.push(ReferenceMatch {
                        document: document.to_path_buf(),
                        start: m.start(),
                        end: m.end(),
                        text: m.as_str().to_string(),
                        filename: entry.filename.clone(),
                    });
                }
            }
        }

        found.sort_by_key(|r| (r.start, r.end));
        found
    }

    /// Rewrites every reference to a mapped filename.
    ///
    /// Filenames are processed one at a time, each in a single pass over the
    /// output of the previous one. Text outside matched spans is copied
    /// through unchanged.
    pub fn rewrite(&self, content: &str) -> RewriteOutcome {
        let mut current: Option<String> = None;
        let mut references = BTreeMap::new();

        for entry in &self.entries {
            let Some(target) = &entry.target else {
                continue;
            };
            let text = current.as_deref().unwrap_or(content);

            let mut spans = BTreeSet::new();
            let mut output = String::with_capacity(text.len());
            let mut last = 0;

            for caps in entry.pattern.captures_iter(text) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                if !spans.insert((whole.start(), whole.end())) {
                    continue;
                }
                output.push_str(&text[last..whole.start()]);
                output.push_str(&replacement(&caps, &entry.filename, target));
                last = whole.end();
            }

            if spans.is_empty() {
                continue;
            }
            output.push_str(&text[last..]);
            references.insert(entry.filename.clone(), spans.len());
            current = Some(output);
        }

        match current {
            Some(content) => RewriteOutcome::Rewritten {
                content,
                references,
            },
            None => RewriteOutcome::Unchanged,
        }
    }
}

fn compile(filename: &str) -> Result<Regex, RewriteError> {
    reference_pattern(filename).map_err(|e| RewriteError::InvalidPattern {
        filename: filename.to_string(),
        reason: e.to_string(),
    })
}

/// Replacement text for one match.
fn replacement(caps: &Captures<'_>, filename: &str, target: &LinkTarget) -> String {
    if target.kind == MediaKind::Video {
        return video_embed(&target.url);
    }

    let group = |name: &str| caps.name(name).map(|m| m.as_str());

    let is_markdown = group("mlabel").is_some();
    let block = group("wblock").or(group("mblock")).unwrap_or("");

    if is_markdown {
        let embed = if group("membed").is_some() { "!" } else { "" };
        let label = group("mlabel").unwrap_or("");
        format!("{}[{}]({}{})", embed, label, target.url, block)
    } else {
        let label = group("walias").unwrap_or(filename);
        format!("[{}]({}{})", label, target.url, block)
    }
}

/// Embeddable player for a migrated video.
pub fn video_embed(url: &str) -> String {
    format!(r#"<video src="{}" controls></video>"#, url)
}
