//! Helpers for keeping source locations out of logs and span fields.
//!
//! Only file names are logged, never directories, buckets or key prefixes.

use std::path::Path;

use crate::storage::FileRef;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Returns only the file name of a local or remote source.
pub fn redact_location(file: &FileRef) -> String {
    match file {
        FileRef::Local { path } => redact_path(path),
        FileRef::Remote { key, .. } => match key.rsplit('/').next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "<unknown>".to_string(),
        },
    }
}
