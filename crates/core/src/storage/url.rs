//! Object keys and public URLs.

use std::path::Path;

/// Joins the configured subfolder and an object name into a key.
pub fn remote_key(subfolder: &str, name: &str) -> String {
    let subfolder = subfolder.trim_matches('/');
    if subfolder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", subfolder, name)
    }
}

/// Percent-encodes each segment of a key, keeping the separators.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Public URL of an object: `{prefix}/{key}` without doubled slashes.
pub fn public_url(prefix: &str, key: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), encode_key(key))
}

/// MIME type for an uploaded file, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "heic" | "heif" => "image/heic",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "ogv" => "video/ogg",
        "mpeg" => "video/mpeg",
        _ => "application/octet-stream",
    }
}
