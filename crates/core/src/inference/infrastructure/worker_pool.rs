use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Sender, TrySendError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queued jobs allowed per worker before `execute` refuses more.
const QUEUE_SLOTS_PER_WORKER: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("worker pool has shut down")]
    Closed,
    #[error("worker pool queue is full")]
    Saturated,
}

/// Fixed-size pool of named threads draining a bounded job channel.
///
/// `execute` never blocks: a full queue is reported as
/// [`WorkerPoolError::Saturated`]. Dropping the pool closes the channel;
/// workers finish the jobs already queued and exit. Drop never joins, since
/// the last owner of the pool may itself be running on one of the workers.
pub struct WorkerPool {
    tx: Sender<Job>,
    size: usize,
    busy: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(size: usize, name: &str) -> std::io::Result<Self> {
        let size = size.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<Job>(size * QUEUE_SLOTS_PER_WORKER);
        let busy = Arc::new(AtomicUsize::new(0));

        for i in 0..size {
            let rx = rx.clone();
            let busy = Arc::clone(&busy);
            thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    for job in rx {
                        busy.fetch_add(1, Ordering::SeqCst);
                        // A panicking job must not take the worker down with it.
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            log::error!("Worker job panicked");
                        }
                        busy.fetch_sub(1, Ordering::SeqCst);
                    }
                })?;
        }
        log::debug!("Started {size} {name} worker(s)");

        Ok(Self { tx, size, busy })
    }

    pub fn execute<F>(&self, job: F) -> Result<(), WorkerPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.try_send(Box::new(job)).map_err(|e| match e {
            TrySendError::Full(_) => WorkerPoolError::Saturated,
            TrySendError::Disconnected(_) => WorkerPoolError::Closed,
        })
    }

    /// Whether a newly queued job would start without waiting for a running
    /// one to finish.
    pub fn has_idle_worker(&self) -> bool {
        self.busy.load(Ordering::SeqCst) + self.tx.len() < self.size
    }

    #[cfg(test)]
    fn size(&self) -> usize {
        self.size
    }

    #[cfg(test)]
    fn queue_capacity(&self) -> usize {
        self.size * QUEUE_SLOTS_PER_WORKER
    }
}
