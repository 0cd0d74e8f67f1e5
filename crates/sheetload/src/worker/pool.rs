use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::job::{ImportJob, JobContext, JobReport};

/// A job together with what it runs against and where its report goes.
pub struct Work {
    pub job: ImportJob,
    pub ctx: Arc<JobContext>,
    pub reply: Sender<JobReport>,
}

/// Fixed set of worker threads serving one named lane.
pub struct WorkerPool {
    lane: String,
    job_sender: Sender<Work>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(lane: &str, worker_count: usize) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }
        let (job_sender, job_receiver) = bounded::<Work>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let lane_name = lane.to_string();

            let handle = thread::Builder::new()
                .name(format!("sheetload-{}-{}", lane, worker_id))
                .spawn(move || run_worker(&lane_name, worker_id, job_rx, shutdown_flag))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers on lane '{}'", worker_count, lane);

        Ok(Self {
            lane: lane.to_string(),
            job_sender,
            workers: Mutex::new(workers),
            shutdown,
        })
    }

    pub fn lane(&self) -> &str {
        &self.lane
    }

    pub fn submit(&self, work: Work) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(work)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool '{}'...", self.lane);
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Signals shutdown and joins every worker.
    pub fn wait(&self) {
        self.shutdown();

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => {
                error!("Worker list lock poisoned on lane '{}'", self.lane);
                return;
            }
        };

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers on lane '{}' have stopped", self.lane);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn run_worker(lane: &str, worker_id: usize, job_receiver: Receiver<Work>, shutdown: Arc<AtomicBool>) {
    debug!("Worker {} on lane '{}' started", worker_id, lane);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            drain_queue(worker_id, &job_receiver);
            break;
        }

        match job_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(Work { mut job, ctx, reply }) => {
                let chunk_index = job.chunk().index;
                let import_id = job.chunk().import_id;
                debug!(
                    "Worker {} processing chunk {} of import {}",
                    worker_id, chunk_index, import_id
                );

                let report = panic::catch_unwind(AssertUnwindSafe(|| job.execute(&ctx)))
                    .unwrap_or_else(|payload| {
                        let reason = panic_reason(payload.as_ref());
                        error!(
                            "Chunk {} of import {} panicked: {}",
                            chunk_index, import_id, reason
                        );
                        JobReport::failed(chunk_index, import_id, format!("panicked: {}", reason))
                    });

                if reply.send(report).is_err() {
                    debug!(
                        "Worker {}: batch for import {} stopped listening",
                        worker_id, import_id
                    );
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Answers queued work that will never run so its batch can still settle.
fn drain_queue(worker_id: usize, job_receiver: &Receiver<Work>) {
    while let Ok(Work { job, reply, .. }) = job_receiver.try_recv() {
        let chunk = job.chunk();
        debug!(
            "Worker {} skipping queued chunk {} of import {}",
            worker_id, chunk.index, chunk.import_id
        );
        let _ = reply.send(JobReport::skipped(chunk.index, chunk.import_id));
    }
}
