//! The import engine: accepts imports, plans and dispatches them, and
//! answers questions about them afterwards.

use std::collections::BTreeSet;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::broadcast::{ImportEvent, ImportPhase, NoopNotifier, NotificationSink};
use crate::config::{validate_config, ImportConfig};
use crate::db::failed_row_repo::{self, FailedRow};
use crate::db::import_repo::{self, ImportFilter, ImportRow, NewImport};
use crate::db::{self, Connections, Database};
use crate::error::{PlanError, Result, SheetloadError};
use crate::estimate::{estimate_rows, EstimateMethod, RowEstimate};
use crate::import::{ColumnMap, ImportOptions, Importer, ImporterRegistry};
use crate::inspect;
use crate::plan::{check_max_rows, decide_mode, plan_chunks, ChunkPlan, ProcessingMode};
use crate::reader::RowSourceReader;
use crate::sanitize::redact_location;
use crate::status::ImportSummary;
use crate::storage::{stage_upload, FileRef, ObjectStore, Storage};
use crate::worker::{dispatch, Batch, BatchHandle, BatchSummary, Chunk, Dispatcher, Finalizer, JobContext};

/// Where a batch runs and where its rows are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routing {
    /// Worker lane; the configured default queue when absent.
    pub queue: Option<String>,
    /// Named connection receiving the importer's writes; the engine's own
    /// database when absent.
    pub connection: Option<String>,
}

/// A request to import one file.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub file_name: String,
    pub source: FileRef,
    pub importer: String,
    pub column_map: ColumnMap,
    /// Sheet, header offset and importer settings; taken from the
    /// configuration when absent.
    pub options: Option<ImportOptions>,
    pub owner: Option<String>,
    /// Overrides the configured processing mode choice.
    pub streaming: Option<bool>,
    pub routing: Routing,
}

impl ImportRequest {
    pub fn new(source: FileRef, importer: impl Into<String>, column_map: ColumnMap) -> Self {
        let file_name = redact_location(&source);
        Self {
            file_name,
            source,
            importer: importer.into(),
            column_map,
            options: None,
            owner: None,
            streaming: None,
            routing: Routing::default(),
        }
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    pub fn options(mut self, options: ImportOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = Some(streaming);
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.routing.queue = Some(queue.into());
        self
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.routing.connection = Some(connection.into());
        self
    }
}

/// A dispatched import.
pub struct ImportHandle {
    pub import_id: i64,
    pub total_rows: u64,
    pub estimate: RowEstimate,
    pub mode: ProcessingMode,
    pub chunks: usize,
    pub warnings: Vec<String>,
    batch: BatchHandle,
}

impl ImportHandle {
    pub fn cancel(&self) {
        self.batch.cancel();
    }

    /// Blocks until every chunk has settled and the import is finalized.
    pub fn wait(self) -> Result<BatchSummary> {
        Ok(self.batch.wait()?)
    }
}

pub struct ImportEngine {
    config: ImportConfig,
    db: Database,
    connections: Connections,
    importers: ImporterRegistry,
    storage: Arc<Storage>,
    reader: Arc<RowSourceReader>,
    notifier: Arc<dyn NotificationSink>,
    dispatcher: Dispatcher,
}

impl ImportEngine {
    /// Creates an engine over an open database.
    pub fn new(config: ImportConfig, db: Database) -> Result<Self> {
        validate_config(&config)?;
        let storage = Arc::new(Storage::local());
        let reader = Arc::new(RowSourceReader::new(Arc::clone(&storage), config.delimiter()));
        let dispatcher = Dispatcher::new(config.worker_count);
        info!(
            "Import engine ready: chunk size {}, {} workers per lane",
            config.chunk_size, config.worker_count
        );
        Ok(Self {
            config,
            db,
            connections: Connections::new(),
            importers: ImporterRegistry::new(),
            storage,
            reader,
            notifier: Arc::new(NoopNotifier),
            dispatcher,
        })
    }

    /// Opens the configured database (or the default location) and creates
    /// an engine over it.
    pub fn open(config: ImportConfig) -> Result<Self> {
        let db = match config.database_path() {
            Some(path) => Database::open(&path)?,
            None => {
                warn!("No database location available; using an in-memory database");
                Database::open_in_memory()?
            }
        };
        Self::new(config, db)
    }

    pub fn with_importer(mut self, importer: Arc<dyn Importer>) -> Self {
        self.importers.register(importer);
        self
    }

    /// Enables `object://` sources.
    pub fn with_remote_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.storage = Arc::new(Storage::with_remote(store));
        self.reader = Arc::new(RowSourceReader::new(
            Arc::clone(&self.storage),
            self.config.delimiter(),
        ));
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Registers a database that imports can route their row writes to.
    pub fn with_connection(mut self, name: impl Into<String>, db: Database) -> Self {
        self.connections.register(name, db);
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn importer_names(&self) -> Vec<&str> {
        self.importers.names()
    }

    fn importer(&self, name: &str) -> Result<Arc<dyn Importer>> {
        self.importers
            .get(name)
            .ok_or_else(|| SheetloadError::UnknownImporter(name.to_string()))
    }

    fn target(&self, connection: Option<&str>) -> Result<Database> {
        match connection {
            None => Ok(self.db.clone()),
            Some(name) => self
                .connections
                .get(name)
                .cloned()
                .ok_or_else(|| SheetloadError::UnknownConnection(name.to_string())),
        }
    }

    fn default_options(&self) -> ImportOptions {
        ImportOptions {
            active_sheet: self.config.active_sheet,
            header_offset: self.config.header_offset,
            ..ImportOptions::default()
        }
    }

    fn find(&self, import_id: i64) -> Result<ImportRow> {
        import_repo::find_by_id(&self.db, import_id)?
            .ok_or(SheetloadError::ImportNotFound(import_id))
    }

    /// Accepts an import and dispatches its chunks.
    ///
    /// Nothing is persisted when the source cannot be opened or has too
    /// many rows.
    pub fn start_import(&self, request: ImportRequest) -> Result<ImportHandle> {
        let _span = tracing::info_span!(
            "start_import",
            file = %redact_location(&request.source),
            importer = %request.importer
        )
        .entered();

        let importer = self.importer(&request.importer)?;
        let target = self.target(request.routing.connection.as_deref())?;
        let options = request.options.unwrap_or_else(|| self.default_options());

        self.check_readable(&request.source, &options)?;
        let estimate = estimate_rows(
            &self.reader,
            &request.source,
            options.active_sheet,
            options.header_offset,
        );
        check_max_rows(estimate.rows, self.config.max_rows)?;

        let size = self.storage.size(&request.source).ok();
        let mode = decide_mode(
            request.streaming.or(self.config.streaming),
            &estimate,
            size,
            self.config.streaming_threshold,
        );

        let stored = self.persist_source(&request.source)?;
        let new_import = NewImport {
            file_name: request.file_name,
            file_path: Some(stored.location()),
            importer: request.importer,
            total_rows: estimate.rows as i64,
            user_id: request.owner,
            column_map: serde_json::to_string(&request.column_map)?,
            options: serde_json::to_string(&options)?,
        };
        let import_id = match import_repo::insert(&self.db, &new_import, &db::now()) {
            Ok(id) => id,
            Err(e) => {
                self.discard_staged(&request.source, &stored);
                return Err(e.into());
            }
        };
        info!(
            "Accepted import {} of {} ({} rows, {:?})",
            import_id,
            redact_location(&stored),
            estimate.rows,
            mode
        );

        let plan = plan_chunks(
            &self.reader,
            &stored,
            estimate.rows,
            self.config.chunk_size,
            &options,
            mode,
        );
        let (mode, chunks, warnings) = (plan.mode, plan.payloads.len(), plan.warnings.clone());
        let batch = self.launch(
            import_id,
            plan,
            request.column_map,
            options,
            importer,
            target,
            &request.routing,
        )?;

        Ok(ImportHandle {
            import_id,
            total_rows: estimate.rows,
            estimate,
            mode,
            chunks,
            warnings,
            batch,
        })
    }

    fn check_readable(&self, source: &FileRef, options: &ImportOptions) -> Result<()> {
        let location = redact_location(source);
        match self.storage.exists(source) {
            Ok(true) => {}
            Ok(false) => {
                return Err(PlanError::Unreadable {
                    location,
                    reason: "file does not exist".to_string(),
                }
                .into())
            }
            Err(e) => {
                return Err(PlanError::Unreadable {
                    location,
                    reason: e.to_string(),
                }
                .into())
            }
        }
        self.reader
            .headers(source, options.active_sheet, options.header_offset)
            .map_err(|e| PlanError::Unreadable {
                location,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Local uploads are copied into the staging directory; remote objects
    /// are referenced where they are.
    fn persist_source(&self, source: &FileRef) -> Result<FileRef> {
        match source {
            FileRef::Local { path } => {
                let staged = stage_upload(path, &self.config.staging_directory())?;
                Ok(FileRef::local(staged))
            }
            FileRef::Remote { .. } => Ok(source.clone()),
        }
    }

    fn discard_staged(&self, original: &FileRef, stored: &FileRef) {
        if original == stored {
            return;
        }
        if let FileRef::Local { path } = stored {
            if let Err(e) = self.storage.delete_local(path) {
                warn!("Could not remove staged copy {}: {}", redact_location(stored), e);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn launch(
        &self,
        import_id: i64,
        plan: ChunkPlan,
        column_map: ColumnMap,
        options: ImportOptions,
        importer: Arc<dyn Importer>,
        target: Database,
        routing: &Routing,
    ) -> Result<BatchHandle> {
        let record = self.find(import_id)?;
        self.notifier.notify(&ImportEvent::from_record(
            &record,
            ImportPhase::Started,
            &format!(
                "Importing {} rows from {} in {} chunks",
                record.total_rows,
                record.file_name,
                plan.payloads.len()
            ),
        ));
        for warning in &plan.warnings {
            self.notifier
                .notify(&ImportEvent::from_record(&record, ImportPhase::Warning, warning));
        }

        let column_map = Arc::new(column_map);
        let options = Arc::new(options);
        let chunks: Vec<Chunk> = plan
            .payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Chunk {
                index,
                import_id,
                payload,
                column_map: Arc::clone(&column_map),
                options: Arc::clone(&options),
            })
            .collect();

        let ctx = Arc::new(JobContext {
            db: self.db.clone(),
            target,
            reader: Arc::clone(&self.reader),
            importer,
            notifier: Arc::clone(&self.notifier),
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        let finalizer = Finalizer {
            db: self.db.clone(),
            storage: Arc::clone(&self.storage),
            notifier: Arc::clone(&self.notifier),
            staging_dir: Some(self.config.staging_directory()),
            keep_local_sources: self.config.keep_local_sources,
        };
        let queue = routing
            .queue
            .clone()
            .unwrap_or_else(|| self.config.default_queue.clone());

        Ok(dispatch(
            &self.dispatcher,
            Batch::new(import_id, queue, chunks),
            ctx,
            finalizer,
        )?)
    }

    /// Runs a finished import again from its stored source, column map and
    /// options. Previous failed rows and counts are discarded.
    pub fn retry(&self, import_id: i64, routing: &Routing) -> Result<ImportHandle> {
        let _span = tracing::info_span!("retry_import", import_id).entered();

        let record = self.find(import_id)?;
        if record.completed_at.is_none() {
            return Err(SheetloadError::ImportInProgress(import_id));
        }
        let source = record
            .file_path
            .as_deref()
            .map(FileRef::parse)
            .ok_or_else(|| SheetloadError::SourceUnavailable {
                import_id,
                location: record.file_name.clone(),
            })?;
        if !self.storage.exists(&source).unwrap_or(false) {
            return Err(SheetloadError::SourceUnavailable {
                import_id,
                location: redact_location(&source),
            });
        }

        let importer = self.importer(&record.importer)?;
        let target = self.target(routing.connection.as_deref())?;
        let column_map: ColumnMap = serde_json::from_str(&record.column_map)?;
        let options: ImportOptions = serde_json::from_str(&record.options)?;

        import_repo::reset_for_retry(&self.db, import_id, &db::now())?;

        let total_rows = record.total_rows.max(0) as u64;
        let estimate = RowEstimate {
            rows: total_rows,
            method: EstimateMethod::Recorded,
        };
        let size = self.storage.size(&source).ok();
        let mode = decide_mode(
            self.config.streaming,
            &estimate,
            size,
            self.config.streaming_threshold,
        );
        let plan = plan_chunks(
            &self.reader,
            &source,
            total_rows,
            self.config.chunk_size,
            &options,
            mode,
        );
        info!(
            "Retrying import {} ({} rows in {} chunks)",
            import_id,
            total_rows,
            plan.payloads.len()
        );

        let (mode, chunks, warnings) = (plan.mode, plan.payloads.len(), plan.warnings.clone());
        let batch = self.launch(
            import_id,
            plan,
            column_map,
            options,
            importer,
            target,
            routing,
        )?;

        Ok(ImportHandle {
            import_id,
            total_rows,
            estimate,
            mode,
            chunks,
            warnings,
            batch,
        })
    }

    pub fn status(&self, import_id: i64) -> Result<ImportSummary> {
        Ok(ImportSummary::from(&self.find(import_id)?))
    }

    pub fn record(&self, import_id: i64) -> Result<ImportRow> {
        self.find(import_id)
    }

    pub fn failed_rows(&self, import_id: i64) -> Result<Vec<FailedRow>> {
        self.find(import_id)?;
        Ok(failed_row_repo::list_by_import(&self.db, import_id)?)
    }

    /// Writes the failed rows of an import as CSV: every column seen in any
    /// failed row, sorted, then the failure message. Returns the number of
    /// rows written.
    pub fn export_failed_rows_csv<W: io::Write>(&self, import_id: i64, writer: W) -> Result<usize> {
        let rows = self.failed_rows(import_id)?;
        let columns: Vec<String> = rows
            .iter()
            .flat_map(|row| row.data.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut out = csv::Writer::from_writer(writer);
        out.write_record(columns.iter().map(String::as_str).chain(["error"]))?;
        for row in &rows {
            let mut record: Vec<&str> = columns
                .iter()
                .map(|c| row.data.get(c).and_then(|v| v.as_deref()).unwrap_or(""))
                .collect();
            record.push(row.validation_error.as_deref().unwrap_or(""));
            out.write_record(&record)?;
        }
        out.flush().map_err(csv::Error::from)?;
        Ok(rows.len())
    }

    pub fn list_imports(&self, filter: &ImportFilter) -> Result<Vec<ImportSummary>> {
        Ok(import_repo::query(&self.db, filter)?
            .iter()
            .map(ImportSummary::from)
            .collect())
    }

    /// Removes completed imports older than the configured retention.
    pub fn cleanup_completed(&self, now: DateTime<Utc>) -> Result<usize> {
        if self.config.auto_cleanup_days == 0 {
            return Ok(0);
        }
        let cutoff = now - chrono::Duration::days(i64::from(self.config.auto_cleanup_days));
        let deleted = import_repo::delete_completed_before(&self.db, &db::timestamp(cutoff))?;
        if deleted > 0 {
            info!(
                "Removed {} imports completed before {}",
                deleted,
                db::timestamp(cutoff)
            );
        }
        Ok(deleted)
    }

    /// Stamps an import complete without waiting for its jobs.
    pub fn mark_completed(&self, import_id: i64) -> Result<bool> {
        self.find(import_id)?;
        Ok(import_repo::mark_completed(&self.db, import_id, &db::now())?)
    }

    pub fn headers(&self, file: &FileRef, sheet: usize, header_offset: u64) -> Vec<String> {
        inspect::headers_for_sheet(&self.reader, file, sheet, header_offset)
    }

    pub fn sheet_names(&self, file: &FileRef) -> Vec<String> {
        inspect::sheet_names(&self.reader, file)
    }

    /// Suggests a column map for `file` from an importer's declared columns.
    pub fn suggest_column_map(
        &self,
        importer: &str,
        file: &FileRef,
        options: &ImportOptions,
    ) -> Result<ColumnMap> {
        let importer = self.importer(importer)?;
        let headers = self.headers(file, options.active_sheet, options.header_offset);
        Ok(inspect::suggest_column_map(&headers, &importer.columns()))
    }

    pub fn estimate(&self, file: &FileRef, options: &ImportOptions) -> RowEstimate {
        estimate_rows(&self.reader, file, options.active_sheet, options.header_offset)
    }

    /// Stops all worker lanes. Queued chunks are skipped.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
