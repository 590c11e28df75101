//! Bounded worker pool for background jobs.
//!
//! Cache-fill jobs and polling ticks all run through one shared pool so a
//! burst of cold requests cannot flood the runtime with unbounded tasks.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// A semaphore-bounded wrapper around [`tokio::spawn`].
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    /// Creates a pool allowing at most `capacity` jobs to run concurrently.
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// Spawns a job on the runtime; the job body waits for a pool permit
    /// before doing any work, so excess jobs queue instead of running.
    pub fn spawn<F, T>(&self, job: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .expect("worker pool semaphore closed");
            job.await
        })
    }

    /// Maximum number of concurrently running jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Currently available job slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(parallelism)
    }
}
