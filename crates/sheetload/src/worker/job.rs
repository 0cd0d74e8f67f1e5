//! The import job: processes one chunk of one import.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::broadcast::{ImportEvent, ImportPhase, NotificationSink};
use crate::db::import_repo::{self, Counter, CounterDelta};
use crate::db::{self, failed_row_repo, Database};
use crate::error::{Result, SheetloadError};
use crate::import::{describe, ColumnMap, ImportOptions, Importer, ProcessedRow, RowError};
use crate::plan::ChunkPayload;
use crate::reader::RowSourceReader;
use crate::storage::FileRef;
use crate::worker::pool::panic_reason;

/// One unit of work. Carries the import's id rather than a copy of the
/// record, which other jobs are updating concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub import_id: i64,
    pub payload: ChunkPayload,
    pub column_map: Arc<ColumnMap>,
    pub options: Arc<ImportOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// The batch was cancelled before the job started.
    Cancelled,
}

/// Outcome of one job, sent back to the batch coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub chunk_index: usize,
    pub import_id: i64,
    pub state: JobState,
    /// Rows handed to the importer.
    pub rows: u64,
    pub imported: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    fn new(chunk: &Chunk, state: JobState) -> Self {
        Self {
            chunk_index: chunk.index,
            import_id: chunk.import_id,
            state,
            rows: 0,
            imported: 0,
            failed: 0,
            error: None,
        }
    }

    pub(crate) fn failed(chunk_index: usize, import_id: i64, error: String) -> Self {
        Self {
            chunk_index,
            import_id,
            state: JobState::Failed,
            rows: 0,
            imported: 0,
            failed: 0,
            error: Some(error),
        }
    }

    pub(crate) fn skipped(chunk_index: usize, import_id: i64) -> Self {
        Self {
            chunk_index,
            import_id,
            state: JobState::Cancelled,
            rows: 0,
            imported: 0,
            failed: 0,
            error: None,
        }
    }
}

/// Everything a job needs besides its chunk. Shared by all jobs of a batch.
pub struct JobContext {
    /// Holds the import record and failed rows.
    pub db: Database,
    /// Receives the importer's per-row writes.
    pub target: Database,
    pub reader: Arc<RowSourceReader>,
    pub importer: Arc<dyn Importer>,
    pub notifier: Arc<dyn NotificationSink>,
    pub cancelled: Arc<AtomicBool>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ChunkOutcome {
    rows: u64,
    imported: u64,
    failed: u64,
}

pub struct ImportJob {
    chunk: Chunk,
    state: JobState,
}

impl ImportJob {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            state: JobState::Pending,
        }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Runs the job. Row failures are recorded and counted; only a failure
    /// to obtain the chunk's rows fails the job, in which case no counters
    /// are applied.
    pub fn execute(&mut self, ctx: &JobContext) -> JobReport {
        let _span = tracing::info_span!(
            "import_job",
            import_id = self.chunk.import_id,
            chunk = self.chunk.index
        )
        .entered();

        if ctx.cancelled.load(Ordering::SeqCst) {
            log::debug!(
                "Skipping chunk {} of import {}: batch cancelled",
                self.chunk.index,
                self.chunk.import_id
            );
            self.state = JobState::Cancelled;
            return JobReport::new(&self.chunk, self.state);
        }

        self.state = JobState::Running;
        match self.run(ctx) {
            Ok(outcome) => {
                self.state = JobState::Succeeded;
                let mut report = JobReport::new(&self.chunk, self.state);
                report.rows = outcome.rows;
                report.imported = outcome.imported;
                report.failed = outcome.failed;
                report
            }
            Err(e) => {
                log::error!(
                    "Chunk {} ({}) of import {} failed: {}",
                    self.chunk.index,
                    self.chunk.payload.describe(),
                    self.chunk.import_id,
                    e
                );
                self.state = JobState::Failed;
                let mut report = JobReport::new(&self.chunk, self.state);
                report.error = Some(e.to_string());
                report
            }
        }
    }

    fn run(&self, ctx: &JobContext) -> Result<ChunkOutcome> {
        let chunk = &self.chunk;
        let record = import_repo::find_by_id(&ctx.db, chunk.import_id)?
            .ok_or(SheetloadError::ImportNotFound(chunk.import_id))?;

        let processed: Vec<ProcessedRow> = match &chunk.payload {
            ChunkPayload::Window(window) => {
                let location =
                    record
                        .file_path
                        .as_deref()
                        .ok_or_else(|| SheetloadError::SourceUnavailable {
                            import_id: record.id,
                            location: String::new(),
                        })?;
                let rows = ctx.reader.read(
                    &FileRef::parse(location),
                    chunk.options.active_sheet,
                    chunk.options.header_offset,
                    Some(*window),
                )?;
                rows.iter().map(|row| chunk.column_map.remap(row)).collect()
            }
            ChunkPayload::Rows(rows) => rows.iter().map(|row| chunk.column_map.remap(row)).collect(),
        };
        let rows = ctx.importer.transform(processed);

        let mut outcome = ChunkOutcome {
            rows: rows.len() as u64,
            ..Default::default()
        };
        for row in &rows {
            // An importer panic fails only this row. The transaction rolls back.
            let result = ctx.target.transaction(|tx| {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    ctx.importer
                        .import(tx, row, &chunk.column_map, &chunk.options)
                }))
                .unwrap_or_else(|payload| {
                    let reason = panic_reason(payload.as_ref());
                    log::error!(
                        "Importer '{}' panicked on a row of import {}: {}",
                        ctx.importer.name(),
                        chunk.import_id,
                        reason
                    );
                    Err(RowError::Message(format!("importer panicked: {}", reason)))
                })
            });
            match result {
                Ok(()) => outcome.imported += 1,
                Err(e) => {
                    outcome.failed += 1;
                    let message = describe(&e);
                    log::debug!("Row failed in import {}: {}", chunk.import_id, e);
                    if let Err(store_err) = failed_row_repo::insert(
                        &ctx.db,
                        chunk.import_id,
                        row,
                        Some(&message),
                        &db::now(),
                    ) {
                        log::error!(
                            "Could not record failed row for import {}: {}",
                            chunk.import_id,
                            store_err
                        );
                    }
                }
            }
        }

        apply_counters(
            &ctx.db,
            chunk.import_id,
            CounterDelta {
                processed: outcome.rows as i64,
                imported: outcome.imported as i64,
                failed: outcome.failed as i64,
            },
        );
        self.report_progress(ctx);

        Ok(outcome)
    }

    /// Emits a progress event and, once every row has been processed, the
    /// owner's completion notice. Concurrent jobs may both see the import
    /// as fully processed, so the notice can arrive more than once.
    fn report_progress(&self, ctx: &JobContext) {
        let record = match import_repo::find_by_id(&ctx.db, self.chunk.import_id) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                log::warn!(
                    "Could not reload import {} after chunk {}: {}",
                    self.chunk.import_id,
                    self.chunk.index,
                    e
                );
                return;
            }
        };

        let message = format!(
            "Processed {} of {} rows",
            record.processed_rows, record.total_rows
        );
        ctx.notifier
            .notify(&ImportEvent::from_record(&record, ImportPhase::Progress, &message));

        let fully_processed = record.total_rows > 0
            && record.processed_rows > 0
            && record.processed_rows >= record.total_rows;
        if fully_processed && record.user_id.is_some() {
            let message = format!(
                "{} rows imported, {} failed",
                record.imported_rows, record.failed_rows
            );
            ctx.notifier
                .notify(&ImportEvent::from_record(&record, ImportPhase::Processed, &message));
        }
    }
}

/// Applies a chunk's counts as one statement, falling back to one
/// statement per counter. Failures are logged, never returned.
pub(crate) fn apply_counters(db: &Database, import_id: i64, delta: CounterDelta) {
    if delta == CounterDelta::default() {
        return;
    }
    let now = db::now();
    let Err(e) = import_repo::increment_counters(db, import_id, delta, &now) else {
        return;
    };
    log::warn!(
        "Grouped counter update failed for import {}: {}; updating counters one by one",
        import_id,
        e
    );
    for counter in Counter::ALL {
        let by = delta.get(counter);
        if by == 0 {
            continue;
        }
        if let Err(e) = import_repo::increment(db, import_id, counter, by, &now) {
            log::error!(
                "Could not increment {:?} for import {}: {}",
                counter,
                import_id,
                e
            );
        }
    }
}
