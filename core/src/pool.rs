//! Bounded task pool shared by the probing modules.
//!
//! A fixed number of workers pull jobs from one queue. The queue holds at most as
//! many pending jobs as there are workers, so [`TaskPool::submit`] waits once the
//! pool is saturated; at most `size` jobs are ever running at the same time.
//! [`TaskPool::join`] closes the queue and waits until every submitted job finished.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("submission cancelled")]
    Cancelled,
    #[error("task pool is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub completed: usize,
    pub panicked: usize,
}

pub struct TaskPool {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    completed: Arc<AtomicUsize>,
    panicked: Arc<AtomicUsize>,
}

impl TaskPool {
    /// Starts `size` workers. A size of zero is treated as one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Job>(size);
        let rx = Arc::new(Mutex::new(rx));
        let completed = Arc::new(AtomicUsize::new(0));
        let panicked = Arc::new(AtomicUsize::new(0));

        let workers = (0..size)
            .map(|_| {
                let rx = Arc::clone(&rx);
                let completed = Arc::clone(&completed);
                let panicked = Arc::clone(&panicked);
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };

                        // A panicking job must not take its worker down with it.
                        match tokio::spawn(job).await {
                            Ok(()) => {
                                completed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => {
                                warn!(error = %err, "pool task did not complete");
                                panicked.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                })
            })
            .collect();

        Self {
            tx,
            workers,
            completed,
            panicked,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues `task`, waiting while the pool is saturated.
    ///
    /// Gives up with [`PoolError::Cancelled`] if `cancel` fires before a slot frees.
    pub async fn submit<F>(&self, cancel: &CancellationToken, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            sent = self.tx.send(Box::pin(task)) => sent.map_err(|_| PoolError::Closed),
        }
    }

    /// Closes the queue and waits for every queued and running job.
    pub async fn join(self) -> PoolStats {
        drop(self.tx);
        for worker in self.workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "pool worker exited abnormally");
            }
        }
        PoolStats {
            completed: self.completed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_every_job_within_the_bound() {
        let pool = TaskPool::new(3);
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            pool.submit(&cancel, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        let stats = pool.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(stats.completed, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn submit_after_cancel_is_refused() {
        let pool = TaskPool::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(pool.submit(&cancel, async {}).await, Err(PoolError::Cancelled));
        assert_eq!(pool.join().await.completed, 0);
    }

    #[tokio::test]
    async fn blocked_submit_wakes_on_cancel() {
        let pool = TaskPool::new(1);
        let cancel = CancellationToken::new();
        let gate = CancellationToken::new();

        // One job running and one queued saturate a pool of size one.
        for _ in 0..2 {
            let gate = gate.clone();
            pool.submit(&cancel, async move { gate.cancelled().await })
                .await
                .unwrap();
        }

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        assert_eq!(pool.submit(&cancel, async {}).await, Err(PoolError::Cancelled));
        gate.cancel();
        assert_eq!(pool.join().await.completed, 2);
    }

    #[tokio::test]
    async fn panicking_job_does_not_stop_the_worker() {
        let pool = TaskPool::new(1);
        let cancel = CancellationToken::new();
        let done = Arc::new(AtomicUsize::new(0));

        pool.submit(&cancel, async { panic!("boom") }).await.unwrap();
        let counter = Arc::clone(&done);
        pool.submit(&cancel, async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        let stats = pool.join().await;
        assert_eq!(stats.panicked, 1);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
