//! Local staging of import sources.
//!
//! Uploaded local files are copied into the staging directory when an
//! import is accepted. Remote sources are downloaded to a temporary file
//! for the duration of a single decode, keeping their original extension.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{FileRef, Storage};
use crate::error::{BlobError, ReadError};

/// Copies an uploaded file into `staging_dir` as `import_<uuid>.<ext>`.
pub fn stage_upload(source: &Path, staging_dir: &Path) -> Result<PathBuf, BlobError> {
    std::fs::create_dir_all(staging_dir).map_err(|e| BlobError::Io {
        path: staging_dir.to_path_buf(),
        source: e,
    })?;

    let file_name = match source.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("import_{}.{}", uuid::Uuid::new_v4(), ext.to_ascii_lowercase()),
        None => format!("import_{}", uuid::Uuid::new_v4()),
    };
    let target = staging_dir.join(file_name);

    std::fs::copy(source, &target).map_err(|e| BlobError::Io {
        path: source.to_path_buf(),
        source: e,
    })?;

    Ok(target)
}

/// A source made available on the local filesystem for decoding.
///
/// Temporary copies are removed when the value is dropped, whichever way
/// the decode ends.
pub enum StagedSource {
    Local(PathBuf),
    Temporary(NamedTempFile),
}

impl StagedSource {
    pub fn prepare(storage: &Storage, file: &FileRef) -> Result<Self, ReadError> {
        match file {
            FileRef::Local { path } => Ok(StagedSource::Local(path.clone())),
            FileRef::Remote { .. } => {
                let bytes = storage.read(file)?;
                let suffix = match file.extension().as_str() {
                    "" => String::new(),
                    ext => format!(".{}", ext),
                };
                let mut temp = tempfile::Builder::new()
                    .prefix("sheetload-")
                    .suffix(&suffix)
                    .tempfile()
                    .map_err(|e| ReadError::Staging(e.to_string()))?;
                temp.write_all(&bytes)
                    .and_then(|_| temp.flush())
                    .map_err(|e| ReadError::Staging(e.to_string()))?;
                log::debug!("Staged {} to {}", file, temp.path().display());
                Ok(StagedSource::Temporary(temp))
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            StagedSource::Local(path) => path,
            StagedSource::Temporary(temp) => temp.path(),
        }
    }
}
