//! Batch coordination: dispatches every job of one import as a unit and
//! finalizes the import once all of them have settled.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::broadcast::{ImportEvent, ImportPhase, NotificationSink};
use crate::db::import_repo::{self, ImportRow};
use crate::db::{self, Database};
use crate::error::WorkerError;
use crate::sanitize::redact_path;
use crate::storage::{FileRef, Storage};
use crate::worker::job::{Chunk, ImportJob, JobContext, JobReport, JobState};
use crate::worker::pool::{Work, WorkerPool};

/// Owns one worker pool per lane, created on first use.
pub struct Dispatcher {
    worker_count: usize,
    pools: Mutex<HashMap<String, Arc<WorkerPool>>>,
}

impl Dispatcher {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self, lane: &str) -> Result<Arc<WorkerPool>, WorkerError> {
        let mut pools = self
            .pools
            .lock()
            .map_err(|_| WorkerError::SpawnFailed("pool registry lock poisoned".to_string()))?;
        if let Some(pool) = pools.get(lane) {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(WorkerPool::new(lane, self.worker_count)?);
        pools.insert(lane.to_string(), Arc::clone(&pool));
        Ok(pool)
    }

    pub fn lanes(&self) -> Vec<String> {
        let mut lanes: Vec<String> = match self.pools.lock() {
            Ok(pools) => pools.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        lanes.sort();
        lanes
    }

    /// Stops every lane and joins its workers.
    pub fn shutdown(&self) {
        let pools: Vec<Arc<WorkerPool>> = match self.pools.lock() {
            Ok(mut pools) => pools.drain().map(|(_, pool)| pool).collect(),
            Err(_) => {
                error!("Pool registry lock poisoned during shutdown");
                return;
            }
        };
        for pool in pools {
            pool.wait();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// All chunks of one import.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: String,
    pub import_id: i64,
    pub lane: String,
    pub chunks: Vec<Chunk>,
}

impl Batch {
    pub fn new(import_id: i64, lane: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            import_id,
            lane: lane.into(),
            chunks,
        }
    }
}

/// What finalization needs once every job has settled.
pub struct Finalizer {
    pub db: Database,
    pub storage: Arc<Storage>,
    pub notifier: Arc<dyn NotificationSink>,
    /// Local sources inside this directory were staged by the engine and
    /// are deleted on completion.
    pub staging_dir: Option<PathBuf>,
    pub keep_local_sources: bool,
}

/// Result of a finished batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub import_id: i64,
    pub jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs that never ran because the batch was cancelled.
    pub skipped: usize,
    pub reports: Vec<JobReport>,
    /// The import record as it stood after finalization.
    pub record: Option<ImportRow>,
}

impl BatchSummary {
    fn new(batch_id: &str, import_id: i64, mut reports: Vec<JobReport>) -> Self {
        reports.sort_by_key(|r| r.chunk_index);
        let count = |state: JobState| reports.iter().filter(|r| r.state == state).count();
        Self {
            batch_id: batch_id.to_string(),
            import_id,
            jobs: reports.len(),
            succeeded: count(JobState::Succeeded),
            failed: count(JobState::Failed),
            skipped: count(JobState::Cancelled),
            reports,
            record: None,
        }
    }
}

/// Handle to a dispatched batch.
pub struct BatchHandle {
    id: String,
    import_id: i64,
    cancelled: Arc<AtomicBool>,
    done: Receiver<BatchSummary>,
}

impl BatchHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn import_id(&self) -> i64 {
        self.import_id
    }

    /// Jobs that have not started yet will be skipped. Running jobs finish
    /// their chunk and finalization still runs.
    pub fn cancel(&self) {
        info!("Cancelling batch {} of import {}", self.id, self.import_id);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks until the batch has been finalized.
    pub fn wait(self) -> Result<BatchSummary, WorkerError> {
        self.done.recv().map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_summary(&self) -> Option<BatchSummary> {
        self.done.try_recv().ok()
    }
}

/// Dispatches a batch onto its lane.
///
/// A coordinator thread submits the jobs, collects one report per job and
/// then finalizes the import exactly once, whatever the jobs' outcomes.
pub fn dispatch(
    dispatcher: &Dispatcher,
    batch: Batch,
    ctx: Arc<JobContext>,
    finalizer: Finalizer,
) -> Result<BatchHandle, WorkerError> {
    let pool = dispatcher.pool(&batch.lane)?;
    let (done_tx, done_rx) = bounded(1);
    let cancelled = Arc::clone(&ctx.cancelled);
    let handle = BatchHandle {
        id: batch.id.clone(),
        import_id: batch.import_id,
        cancelled,
        done: done_rx,
    };

    info!(
        "Dispatching batch {} for import {}: {} jobs on lane '{}'",
        batch.id,
        batch.import_id,
        batch.chunks.len(),
        batch.lane
    );

    thread::Builder::new()
        .name(format!("sheetload-batch-{}", batch.import_id))
        .spawn(move || {
            let summary = coordinate(&pool, batch, ctx, &finalizer);
            if done_tx.send(summary).is_err() {
                debug!("Batch handle dropped before completion");
            }
        })
        .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

    Ok(handle)
}

fn coordinate(
    pool: &WorkerPool,
    batch: Batch,
    ctx: Arc<JobContext>,
    finalizer: &Finalizer,
) -> BatchSummary {
    let _span = tracing::info_span!(
        "batch",
        batch_id = %batch.id,
        import_id = batch.import_id,
        jobs = batch.chunks.len()
    )
    .entered();

    let (reply_tx, reply_rx) = unbounded::<JobReport>();
    let mut reports = Vec::with_capacity(batch.chunks.len());
    let mut submitted = 0usize;

    for chunk in batch.chunks {
        if ctx.cancelled.load(Ordering::SeqCst) {
            reports.push(JobReport::skipped(chunk.index, chunk.import_id));
            continue;
        }
        let chunk_index = chunk.index;
        let work = Work {
            job: ImportJob::new(chunk),
            ctx: Arc::clone(&ctx),
            reply: reply_tx.clone(),
        };
        match pool.submit(work) {
            Ok(()) => submitted += 1,
            Err(e) => {
                error!(
                    "Could not submit chunk {} of import {}: {}",
                    chunk_index, batch.import_id, e
                );
                reports.push(JobReport::failed(chunk_index, batch.import_id, e.to_string()));
            }
        }
    }
    drop(reply_tx);

    let settled_before = reports.len();
    reports.extend(reply_rx.iter().take(submitted));
    let received = reports.len() - settled_before;
    if received < submitted {
        warn!(
            "Batch {} lost {} job reports",
            batch.id,
            submitted - received
        );
    }

    let mut summary = BatchSummary::new(&batch.id, batch.import_id, reports);
    info!(
        "Batch {} settled: {} succeeded, {} failed, {} skipped",
        summary.batch_id, summary.succeeded, summary.failed, summary.skipped
    );
    summary.record = finalize(finalizer, batch.import_id);
    summary
}

/// Completes an import. Every step is best-effort; problems are logged and
/// never prevent the record from being stamped.
pub fn finalize(finalizer: &Finalizer, import_id: i64) -> Option<ImportRow> {
    let _span = tracing::info_span!("finalize", import_id).entered();

    let record = match import_repo::find_by_id(&finalizer.db, import_id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!("Import {} disappeared before finalization", import_id);
            return None;
        }
        Err(e) => {
            error!("Could not load import {} for finalization: {}", import_id, e);
            return None;
        }
    };

    match import_repo::mark_completed(&finalizer.db, import_id, &db::now()) {
        Ok(true) => {}
        Ok(false) => debug!("Import {} was already completed", import_id),
        Err(e) => error!("Could not mark import {} completed: {}", import_id, e),
    }

    release_source(finalizer, &record);

    let record = match import_repo::find_by_id(&finalizer.db, import_id) {
        Ok(Some(record)) => record,
        Ok(None) => return None,
        Err(e) => {
            error!("Could not reload import {} after completion: {}", import_id, e);
            return None;
        }
    };

    if record.processed_rows != record.total_rows {
        warn!(
            "Import {} finished with {} of {} rows processed",
            import_id, record.processed_rows, record.total_rows
        );
    }

    let message = format!(
        "Import of {} complete: {} imported, {} failed, {} total",
        record.file_name, record.imported_rows, record.failed_rows, record.total_rows
    );
    finalizer
        .notifier
        .notify(&ImportEvent::from_record(&record, ImportPhase::Completed, &message));
    info!("{}", message);

    Some(record)
}

/// Deletes a locally staged source. Remote objects and files outside the
/// staging directory are left alone.
fn release_source(finalizer: &Finalizer, record: &ImportRow) {
    if finalizer.keep_local_sources {
        return;
    }
    let Some(location) = record.file_path.as_deref() else {
        return;
    };
    let FileRef::Local { path } = FileRef::parse(location) else {
        return;
    };
    let staged = finalizer
        .staging_dir
        .as_deref()
        .is_some_and(|dir| path.starts_with(dir));
    if !staged {
        return;
    }

    if let Err(e) = finalizer.storage.delete_local(&path) {
        warn!(
            "Could not delete staged source {} for import {}: {}",
            redact_path(&path),
            record.id,
            e
        );
        return;
    }
    debug!("Deleted staged source {}", redact_path(&path));
    if let Err(e) = import_repo::update_file_path(&finalizer.db, record.id, None, &db::now()) {
        warn!(
            "Could not clear source of import {}: {}",
            record.id, e
        );
    }
}
