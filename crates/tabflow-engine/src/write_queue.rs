//! Per-run serial write queue
//!
//! All storage writes and event appends for one run funnel through this
//! queue: a task draining a FIFO of write closures. That serializes the
//! run's persistence without any global locking, so per-run event order
//! holds even when the debug controller or control surface writes
//! concurrently with the runner.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use tabflow_core::RunError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A FIFO of write closures drained by a dedicated task
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<Job>,
    drainer: JoinHandle<()>,
}

impl WriteQueue {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let drainer = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            debug!("write queue drained");
        });
        Self { tx, drainer }
    }

    /// Run a write on the queue and wait for its result
    pub async fn exec<T, F>(&self, fut: F) -> Result<T, RunError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(fut.await);
        });
        self.tx
            .send(job)
            .map_err(|_| RunError::internal("write queue closed"))?;
        rx.await
            .map_err(|_| RunError::internal("write queue dropped a job"))
    }

    /// Close the queue and wait for queued writes to finish
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.drainer.await;
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn writes_execute_in_submission_order() {
        let queue = WriteQueue::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..10 {
            let log = log.clone();
            queue
                .exec(async move {
                    // Stagger so out-of-order execution would show up
                    tokio::time::sleep(Duration::from_millis(10 - i)).await;
                    log.lock().push(i);
                })
                .await
                .unwrap();
        }

        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn exec_returns_the_job_result() {
        let queue = WriteQueue::new();
        let result: usize = queue.exec(async { 41 + 1 }).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn concurrent_submitters_serialize_through_one_drainer() {
        let queue = Arc::new(WriteQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            let counter = counter.clone();
            tasks.push(tokio::spawn(async move {
                queue
                    .exec(async move {
                        // Non-atomic read-modify-write: races would lose counts
                        let seen = counter.load(Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        counter.store(seen + 1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 8);

        let queue = Arc::try_unwrap(queue).ok().expect("sole owner");
        queue.shutdown().await;
    }
}
