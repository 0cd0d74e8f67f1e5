pub mod broadcast;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod estimate;
pub mod import;
pub mod inspect;
pub mod plan;
pub mod reader;
pub mod sanitize;
pub mod status;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use broadcast::{ImportEvent, ImportPhase, ImportProgressBroadcaster, NotificationSink, Severity};
pub use config::{load_config, load_config_from_str, ImportConfig};
pub use db::failed_row_repo::FailedRow;
pub use db::import_repo::{ImportFilter, ImportRow};
pub use db::Database;
pub use engine::{ImportEngine, ImportHandle, ImportRequest, Routing};
pub use error::{
    BlobError, ConfigError, PlanError, ReadError, Result, SheetloadError, WorkerError,
};
pub use estimate::{EstimateMethod, RowEstimate};
pub use import::{
    ColumnMap, FieldError, ImportColumn, ImportOptions, Importer, ProcessedRow, RowError,
};
pub use plan::ProcessingMode;
pub use reader::{RawRow, RowSourceReader, RowWindow};
pub use status::{ImportStatus, ImportSummary};
pub use storage::{FileRef, MemoryObjectStore, ObjectStore, Storage};
pub use telemetry::{init_logging, LogFormat};
pub use worker::BatchSummary;
