//! Bounded worker pool shared by the batch coordinator and the fund aggregator.

use std::sync::Arc;

use settlement_types::AppError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A fixed number of permits; every unit of external work holds one.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Waits for a free worker. The permit is released when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AppError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Worker pool closed".into()))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently idle.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
