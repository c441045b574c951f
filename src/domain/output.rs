//! Mapping from logical request paths to files under the output root and to request
//! targets.

use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use axum::http::Uri;

/// Filesystem location a logical path is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutput {
    /// File receiving the response body.
    pub file: PathBuf,
    /// Parent directory of `file`; must exist before the file is created.
    pub dir: PathBuf,
}

/// Resolve where the body for `path` is written.
///
/// Paths ending in `/` denote directories and receive `index_filename` as their final
/// segment. Segments are pushed one by one so the host separator is used; empty and `.`
/// segments are dropped and `..` never climbs above `root`.
///
/// Unlike a plain lexical join, a leading `..` is discarded instead of kept: `/../x`
/// resolves to `root/x`, not to a sibling of `root`.
pub fn resolve(root: &Path, index_filename: &str, path: &str) -> ResolvedOutput {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut file = root.to_path_buf();
    file.extend(segments);
    if is_directory_path(path) {
        file.push(index_filename);
    }

    let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
    ResolvedOutput { file, dir }
}

/// Whether the logical path names a directory (and therefore an index file).
pub fn is_directory_path(path: &str) -> bool {
    path.ends_with('/')
}

/// Request target for `path`. A path that is already a valid URI is used as is; otherwise
/// each `/`-separated segment is percent-encoded.
pub fn request_target(path: &str) -> Cow<'_, str> {
    if path.parse::<Uri>().is_ok() {
        return Cow::Borrowed(path);
    }
    let encoded: Vec<Cow<'_, str>> = path.split('/').map(urlencoding::encode).collect();
    Cow::Owned(encoded.join("/"))
}

/// Logical path for a request's URI path: percent-decoded, or unchanged when decoding
/// yields invalid UTF-8.
pub fn logical_path(uri_path: &str) -> Cow<'_, str> {
    urlencoding::decode(uri_path).unwrap_or(Cow::Borrowed(uri_path))
}
