//! CPU worker pool for frame decoding and pose extraction.
//!
//! Jobs go through a shared crossbeam queue to a fixed set of OS threads; the
//! caller awaits the result on a oneshot channel, so async tasks never block
//! on inference.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker pool has shut down")]
    ShutDown,
    #[error("worker job panicked before producing a result")]
    Lost,
}

/// Cheap to clone; the threads exit once every handle is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    jobs: Sender<Job>,
    size: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let size = threads.max(1);
        let (jobs, queue) = unbounded::<Job>();
        for i in 0..size {
            let queue = queue.clone();
            thread::Builder::new()
                .name(format!("pose-worker-{i}"))
                .spawn(move || run_worker(queue))?;
        }
        Ok(Self { jobs, size })
    }

    /// One thread per available core.
    pub fn with_default_size() -> std::io::Result<Self> {
        let threads = thread::available_parallelism().map_or(4, |n| n.get());
        Self::new(threads)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `job` on a worker thread and waits for its result.
    pub async fn run<F, T>(&self, job: F) -> Result<T, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // receiver gone means the caller stopped waiting
            let _ = tx.send(job());
        });
        self.jobs.send(job).map_err(|_| WorkerError::ShutDown)?;
        rx.await.map_err(|_| WorkerError::Lost)
    }
}

fn run_worker(queue: Receiver<Job>) {
    for job in queue.iter() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!(
                "job panicked on {}",
                thread::current().name().unwrap_or("pose-worker")
            );
        }
    }
}
