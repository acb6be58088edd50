// src/pool.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Parallelism used when the caller does not choose one.
pub const DEFAULT_PARALLELISM: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("task dropped before it started")]
    Abandoned,
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Handle to a submitted job. Resolves once the job ran or was dropped from the queue.
pub type PoolHandle<T> = JoinHandle<Result<T, PoolError>>;

/// Runs blocking jobs with at most `parallelism` of them executing at once.
/// Submissions past that limit wait for a free slot; the order in which waiting jobs
/// start is not guaranteed to match submission order.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    parallelism: usize,
}

impl WorkerPool {
    pub fn new(parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        Self {
            permits: Arc::new(Semaphore::new(parallelism)),
            closed: Arc::new(AtomicBool::new(false)),
            parallelism,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Number of jobs currently holding a worker slot.
    pub fn active(&self) -> usize {
        self.parallelism - self.permits.available_permits()
    }

    /// Queues a blocking job. Must be called from within a tokio runtime.
    pub fn submit<F, T>(&self, job: F) -> PoolHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let closed = self.closed.load(Ordering::SeqCst);
        tokio::spawn(async move {
            if closed {
                return Err(PoolError::Abandoned);
            }
            // A closed semaphore means the pool was shut down with pending work dropped.
            let permit = permits.acquire_owned().await.map_err(|_| PoolError::Abandoned)?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            })
            .await
            .map_err(|e| PoolError::Panicked(e.to_string()))
        })
    }

    /// Stops accepting work. With `cancel_pending`, jobs still waiting for a slot are
    /// dropped without running; jobs already running are always left to finish.
    pub fn shutdown(&self, cancel_pending: bool) {
        if self.closed.swap(true, Ordering::SeqCst) && !cancel_pending {
            return;
        }
        if cancel_pending {
            self.permits.close();
        }
        debug!("Worker pool shut down (cancel_pending: {})", cancel_pending);
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLELISM)
    }
}
