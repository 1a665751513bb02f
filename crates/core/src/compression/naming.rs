//! Names for compressed derivatives.

use std::path::Path;
use uuid::Uuid;

use crate::workload::MediaKind;

/// Length of the random prefix put in front of derivative names.
pub const PREFIX_LEN: usize = 20;

/// A fresh random prefix of `PREFIX_LEN` lowercase hex characters.
pub fn random_prefix() -> String {
    let mut prefix = Uuid::new_v4().simple().to_string();
    prefix.truncate(PREFIX_LEN);
    prefix
}

/// Makes a file stem safe for object keys and link targets.
///
/// Whitespace and characters that are special in paths, URLs or markdown
/// link syntax become `_`.
pub fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| match c {
            c if c.is_whitespace() => '_',
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '#' | '%' | '[' | ']' | '(' | ')' => '_',
            c => c,
        })
        .collect()
}

/// Derivative name for `original` with a fresh random prefix.
pub fn derived_filename(original: &str, kind: MediaKind) -> String {
    derived_filename_with_prefix(&random_prefix(), original, kind)
}

/// Derivative name built as `{prefix}_{sanitized stem}.{jpg|mp4}`.
pub fn derived_filename_with_prefix(prefix: &str, original: &str, kind: MediaKind) -> String {
    let stem = Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    format!(
        "{}_{}.{}",
        prefix,
        sanitize_stem(&stem),
        kind.output_extension()
    )
}
