//! Blob storage for import sources.
//!
//! A source is either a local file or an object in a remote store. The
//! engine only needs to read, probe and size sources, and to delete the
//! copies it staged locally itself.

pub mod object;
pub mod staging;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BlobError;

pub use object::{MemoryObjectStore, ObjectStore};
pub use staging::{stage_upload, StagedSource};

const REMOTE_SCHEME: &str = "object://";

/// A resolved, storage-agnostic reference to an import source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileRef {
    Local { path: PathBuf },
    Remote { bucket: String, key: String },
}

impl FileRef {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        FileRef::Local { path: path.into() }
    }

    pub fn remote(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        FileRef::Remote {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parses a location previously produced by [`FileRef::location`].
    pub fn parse(location: &str) -> Self {
        if let Some(rest) = location.strip_prefix(REMOTE_SCHEME) {
            if let Some((bucket, key)) = rest.split_once('/') {
                if !bucket.is_empty() && !key.is_empty() {
                    return FileRef::remote(bucket, key);
                }
            }
        }
        FileRef::local(location)
    }

    /// The string stored in the import record.
    pub fn location(&self) -> String {
        match self {
            FileRef::Local { path } => path.to_string_lossy().into_owned(),
            FileRef::Remote { bucket, key } => format!("{}{}/{}", REMOTE_SCHEME, bucket, key),
        }
    }

    /// Lowercased extension without the dot, or an empty string.
    pub fn extension(&self) -> String {
        let name = match self {
            FileRef::Local { path } => path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
            FileRef::Remote { key, .. } => key.rsplit('/').next().unwrap_or(""),
        };
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, FileRef::Remote { .. })
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location())
    }
}

/// Read access to local files and, when configured, one remote store.
#[derive(Clone, Default)]
pub struct Storage {
    remote: Option<Arc<dyn ObjectStore>>,
}

impl Storage {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn with_remote(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            remote: Some(store),
        }
    }

    fn remote_store(&self, bucket: &str) -> Result<&Arc<dyn ObjectStore>, BlobError> {
        self.remote
            .as_ref()
            .ok_or_else(|| BlobError::NoRemoteStore(bucket.to_string()))
    }

    pub fn read(&self, file: &FileRef) -> Result<Vec<u8>, BlobError> {
        match file {
            FileRef::Local { path } => std::fs::read(path).map_err(|e| BlobError::Io {
                path: path.clone(),
                source: e,
            }),
            FileRef::Remote { bucket, key } => self.remote_store(bucket)?.get_object(bucket, key),
        }
    }

    pub fn exists(&self, file: &FileRef) -> Result<bool, BlobError> {
        match file {
            FileRef::Local { path } => Ok(path.is_file()),
            FileRef::Remote { bucket, key } => {
                self.remote_store(bucket)?.object_exists(bucket, key)
            }
        }
    }

    pub fn size(&self, file: &FileRef) -> Result<u64, BlobError> {
        match file {
            FileRef::Local { path } => std::fs::metadata(path)
                .map(|m| m.len())
                .map_err(|e| BlobError::Io {
                    path: path.clone(),
                    source: e,
                }),
            FileRef::Remote { bucket, key } => self.remote_store(bucket)?.object_size(bucket, key),
        }
    }

    /// Deletes a locally staged file. Remote objects are never deleted.
    pub fn delete_local(&self, path: &Path) -> Result<(), BlobError> {
        std::fs::remove_file(path).map_err(|e| BlobError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
