// Render pool - Fixed worker threads draining a bounded job queue
// Cache misses run here so the loop tick never waits on a transform

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError, bounded};
use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Render queue is full")]
    Saturated,

    #[error("Render pool has shut down")]
    ShutDown,
}

#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    fn add(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Bounded pool of render workers
pub struct RenderPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    outstanding: Arc<Outstanding>,
}

impl RenderPool {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = bounded::<Job>(queue_capacity.max(1));
        let outstanding = Arc::new(Outstanding::default());

        let workers = (0..workers.max(1))
            .filter_map(|index| {
                let receiver = receiver.clone();
                let outstanding = Arc::clone(&outstanding);
                thread::Builder::new()
                    .name(format!("render-{}", index))
                    .spawn(move || {
                        for job in receiver.iter() {
                            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                            if result.is_err() {
                                log::error!("Render job panicked");
                            }
                            outstanding.done();
                        }
                    })
                    .map_err(|err| log::error!("Failed to spawn render worker: {}", err))
                    .ok()
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            outstanding,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job without blocking
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(PoolError::ShutDown)?;
        self.outstanding.add();
        match sender.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.outstanding.done();
                match err {
                    TrySendError::Full(_) => Err(PoolError::Saturated),
                    TrySendError::Disconnected(_) => Err(PoolError::ShutDown),
                }
            }
        }
    }

    /// Number of jobs queued or running
    pub fn pending(&self) -> usize {
        *self
            .outstanding
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until every submitted job has finished, false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self
            .outstanding
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .outstanding
                .idle
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
        }
        true
    }

    /// Stop accepting jobs, finish the queued ones and join the workers
    pub fn shutdown(&mut self) {
        self.sender.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // A job may hold the last reference to the pool's owner
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for RenderPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
