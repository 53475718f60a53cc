//! Serialized request queue (one job in flight)
//!
//! Every protocol-correlated request (writes, matrix operations and
//! subscription lookups) runs on a single worker task in submission order.
//! A job's failure is logged and never reaches the jobs behind it.
//! `clear()` drops everything not yet started.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueuedJob {
    generation: u64,
    label: String,
    job: BoxedJob,
}

/// Result of a queued job, resolved once the worker has run it
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> JobHandle<T> {
    /// Wait for the job; a job dropped by `clear()` resolves to an error
    pub async fn outcome(self) -> Result<T> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(anyhow!("job dropped before it ran")))
    }
}

/// Single-worker FIFO of async jobs
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    generation: Arc<AtomicU64>,
}

impl WriteQueue {
    /// Spawn the worker; must be called inside a tokio runtime
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();
        let generation = Arc::new(AtomicU64::new(0));
        let current = Arc::clone(&generation);

        tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                if queued.generation != current.load(Ordering::SeqCst) {
                    trace!(job = %queued.label, "Dropping cleared job");
                    continue;
                }
                trace!(job = %queued.label, "Running queued job");
                queued.job.await;
            }
            trace!("Write queue worker stopped");
        });

        Self { tx, generation }
    }

    /// Append a job; its result is available through the returned handle
    pub fn enqueue<T, F>(&self, label: impl Into<String>, fut: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let label = label.into();
        let (result_tx, rx) = oneshot::channel();
        let job_label = label.clone();
        let job: BoxedJob = Box::pin(async move {
            let result = fut.await;
            if let Err(e) = &result {
                debug!(job = %job_label, "Queued job failed: {:#}", e);
            }
            let _ = result_tx.send(result);
        });

        let queued = QueuedJob {
            generation: self.generation.load(Ordering::SeqCst),
            label,
            job,
        };
        if let Err(mpsc::error::SendError(queued)) = self.tx.send(queued) {
            debug!(job = %queued.label, "Write queue closed, job discarded");
        }
        JobHandle { rx }
    }

    /// Drop every job that has not started yet
    pub fn clear(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "Write queue cleared");
    }

    /// Resolve once every job queued before this call has finished
    pub async fn drain(&self) {
        let _ = self.enqueue("drain", async { Ok::<_, anyhow::Error>(()) }).outcome().await;
    }
}
