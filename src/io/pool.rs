//! Bounded worker pool: tokio tasks gated by a semaphore, one driver call per task

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

use crate::error::{Error, Result};

/// `min(32, cpus + 4)`
pub fn default_max_workers() -> usize {
    (num_cpus::get() + 4).min(32)
}

/// Task handle resolving to one chunk result
pub type Pending<T> = JoinHandle<Result<T>>;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(max_workers: Option<usize>) -> Self {
        let size = max_workers.filter(|n| *n > 0).unwrap_or_else(default_max_workers);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn `task`; it starts once a worker slot is free
    pub fn submit<F, T>(&self, task: F) -> Pending<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| anyhow!("worker pool closed: {}", e))?;
            task.await
        })
    }
}

/// Flatten a joined task result. A cancelled or panicked task is a transfer failure.
pub fn joined<T>(result: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    result.map_err(|e| Error::Transfer(anyhow!("worker task failed: {}", e)))?
}
