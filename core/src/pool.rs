use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Fixed number of request slots shared by every worker of a scan. Holding a permit is
/// the right to have one request in flight; the pool size is the only backpressure.
pub struct WorkerPool {
    sem: Arc<Semaphore>,
    size: usize,
}

impl Clone for WorkerPool {
    fn clone(&self) -> Self { WorkerPool { sem: self.sem.clone(), size: self.size } }
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        WorkerPool { sem: Arc::new(Semaphore::new(size)), size }
    }

    pub fn size(&self) -> usize { self.size }

    /// Wait for a free slot. Fails only after `close`.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.sem.clone().acquire_owned().await
    }

    /// Wake every waiter with an error. The executor closes its pool once cancelled so
    /// nothing still queued for a slot gets one.
    pub fn close(&self) { self.sem.close(); }
}
