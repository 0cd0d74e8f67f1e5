pub mod batch;
pub mod job;
pub mod pool;

pub use batch::{dispatch, finalize, Batch, BatchHandle, BatchSummary, Dispatcher, Finalizer};
pub use job::{Chunk, ImportJob, JobContext, JobReport, JobState};
pub use pool::{Work, WorkerPool};

pub use crossbeam_channel;
