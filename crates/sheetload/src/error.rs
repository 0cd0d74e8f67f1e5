use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SheetloadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("Storage error: {0}")]
    Blob(#[from] BlobError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Import {0} not found")]
    ImportNotFound(i64),

    #[error("Unknown importer '{0}'")]
    UnknownImporter(String),

    #[error("Unknown connection '{0}'")]
    UnknownConnection(String),

    #[error("Source for import {import_id} is no longer available: {location}")]
    SourceUnavailable { import_id: i64, location: String },

    #[error("Import {0} is still running")]
    ImportInProgress(i64),

    #[error("Failed to encode import settings: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write export: {0}")]
    Export(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors that abort an import before anything is persisted or dispatched.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("File has {actual} data rows, which exceeds the maximum of {max}")]
    MaxRowsExceeded { max: u64, actual: u64 },

    #[error("Source file '{location}' cannot be opened: {reason}")]
    Unreadable { location: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stage remote source: {0}")]
    Staging(String),

    #[error("Sheet index {0} does not exist")]
    SheetNotFound(usize),

    #[error("Failed to decode spreadsheet: {0}")]
    Workbook(String),

    #[error("Failed to decode delimited text: {0}")]
    Delimited(#[from] csv::Error),

    #[error(transparent)]
    Blob(#[from] BlobError),
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("No remote store is configured for '{0}'")]
    NoRemoteStore(String),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job failed: {0}")]
    JobFailed(String),
}

pub type Result<T> = std::result::Result<T, SheetloadError>;
