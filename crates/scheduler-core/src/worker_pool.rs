//! Bounded-concurrency executor for claimed tasks.
//!
//! Unlike a queue-polling dispatcher, submissions here are pushed directly by
//! the dispatch engine's claim loop, which already knows exactly which task
//! ids are due. `submit` acquires a semaphore permit (waiting if the pool is
//! saturated) and spawns the run; the permit is dropped automatically when
//! the run completes, freeing the slot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<WorkerPoolRef>,
}

struct WorkerPoolRef {
    semaphore: Arc<Semaphore>,
    shutdown_timeout: Duration,
    in_flight: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize, shutdown_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(WorkerPoolRef {
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                shutdown_timeout,
                in_flight: Arc::new(RwLock::new(Vec::new())),
            }),
        }
    }

    /// Acquire a permit and spawn `work`. Awaits if the pool is saturated;
    /// never drops work on the floor.
    pub async fn submit<F>(&self, work: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.inner.semaphore);
        let permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!("worker pool semaphore closed, dropping submission");
                return;
            }
        };

        let handle = tokio::spawn(async move {
            work.await;
            drop(permit);
        });

        let mut in_flight = self.inner.in_flight.write().await;
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Stop accepting new work and wait (bounded) for in-flight runs to
    /// finish. In-flight handlers are never cancelled, only awaited.
    pub async fn shutdown(&self) {
        self.inner.semaphore.close();

        let mut in_flight = self.inner.in_flight.write().await;
        for handle in in_flight.drain(..) {
            match tokio::time::timeout(self.inner.shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("worker task panicked during shutdown: {:?}", e),
                Err(_) => tracing::warn!("worker task did not finish within shutdown timeout"),
            }
        }
    }

    pub fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn caps_concurrency_at_max() {
        let pool = WorkerPool::new(2, Duration::from_secs(5));
        let barrier = Arc::new(Barrier::new(2));
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            let peak = Arc::clone(&peak);
            let in_flight = Arc::clone(&in_flight);
            pool.submit(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Only the first two submissions reach the barrier concurrently;
                // later ones arrive after a permit frees up.
                if now <= 2 {
                    let _ = tokio::time::timeout(Duration::from_millis(50), barrier.wait()).await;
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
            })
            .await;
        }

        pool.shutdown().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_work() {
        let pool = WorkerPool::new(4, Duration::from_secs(5));
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let completed = Arc::clone(&completed);
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        pool.shutdown().await;
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }
}
