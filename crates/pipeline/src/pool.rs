//! Bounded worker pool for partition tasks.

use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

use crate::error::{ForcingError, Result};

/// A fixed number of worker slots, each with the same memory ceiling.
///
/// A partition task holds one permit for its whole lifetime, so no more
/// than `size()` partitions are resident at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: usize,
    memory_limit: u64,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(workers: usize, memory_limit: u64) -> Result<Self> {
        if workers == 0 {
            return Err(ForcingError::config("worker pool needs at least one worker"));
        }
        if memory_limit == 0 {
            return Err(ForcingError::config("memory limit per worker must be > 0"));
        }
        Ok(Self {
            size: workers,
            memory_limit,
            semaphore: Arc::new(Semaphore::new(workers)),
        })
    }

    /// Shrink to `partitions` workers when there are fewer partitions than
    /// workers.
    pub fn capped(self, partitions: usize) -> Self {
        let size = self.size.min(partitions.max(1));
        if size == self.size {
            return self;
        }
        Self {
            size,
            memory_limit: self.memory_limit,
            semaphore: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Largest partition, in time steps, that fits one worker.
    pub fn max_partition_steps(&self, bytes_per_step: u64) -> Result<usize> {
        let steps = self.memory_limit / bytes_per_step.max(1);
        if steps == 0 {
            return Err(ForcingError::config(format!(
                "one time step needs {} bytes, more than the {} byte worker memory limit",
                bytes_per_step, self.memory_limit
            )));
        }
        Ok(usize::try_from(steps).unwrap_or(usize::MAX))
    }

    /// Wait for a free worker.
    pub async fn acquire(&self) -> std::result::Result<OwnedSemaphorePermit, AcquireError> {
        self.semaphore.clone().acquire_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_pool() {
        assert!(WorkerPool::new(0, 1024).is_err());
        assert!(WorkerPool::new(2, 0).is_err());
    }

    #[test]
    fn test_capped_by_partition_count() {
        let pool = WorkerPool::new(8, 1024).unwrap().capped(3);
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.available(), 3);

        let pool = WorkerPool::new(2, 1024).unwrap().capped(10);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_max_partition_steps() {
        let pool = WorkerPool::new(1, 1000).unwrap();
        assert_eq!(pool.max_partition_steps(100).unwrap(), 10);
        assert_eq!(pool.max_partition_steps(300).unwrap(), 3);
        assert!(matches!(pool.max_partition_steps(1001), Err(ForcingError::Config(_))));
    }

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let pool = WorkerPool::new(2, 1024).unwrap();
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(a);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_acquire_waits_for_a_free_worker() {
        let pool = WorkerPool::new(1, 1024).unwrap();
        let held = tokio_test::block_on(pool.acquire()).unwrap();

        let mut waiting = tokio_test::task::spawn(pool.acquire());
        tokio_test::assert_pending!(waiting.poll());

        drop(held);
        assert!(waiting.is_woken());
        tokio_test::assert_ready_ok!(waiting.poll());
    }
}
