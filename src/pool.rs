//! Bounded worker pool with per-job failure isolation.
//!
//! A [`WorkerPool`] owns a fixed group of tokio tasks pulling jobs from a
//! bounded queue. Submitting returns a [`JobHandle`]; awaiting a set of handles
//! is the barrier the driver uses per source. A job that panics is logged and
//! resolves to `None` without taking its worker down. [`WorkerPool::shutdown`]
//! closes the queue and waits until every queued job has run.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

type Job = BoxFuture<'static, ()>;

/// Receiver side of a submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Option<T>>,
}

impl<T> JobHandle<T> {
    /// Wait for the job. `None` means it failed or never ran.
    pub async fn join(self) -> Option<T> {
        self.rx.await.ok().flatten()
    }
}

/// Wait for every handle; this is the per-source completion barrier.
pub async fn join_all<T>(handles: Vec<JobHandle<T>>) -> Vec<Option<T>> {
    futures::future::join_all(handles.into_iter().map(JobHandle::join)).await
}

#[derive(Debug)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    queue: mpsc::Sender<Job>,
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Start `size` workers (at least one) behind a queue of `2 * size` jobs.
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        let (queue, rx) = mpsc::channel::<Job>(size * 2);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for id in 0..size {
            let rx = Arc::clone(&rx);
            workers.spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                debug!(pool = name, worker = id, "Worker exiting");
            });
        }

        info!(pool = name, workers = size, "Worker pool started");
        Self {
            name,
            size,
            queue,
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job, waiting while the queue is full.
    ///
    /// The job's `None` output and any panic both resolve the handle to `None`.
    pub async fn submit<F, T>(&self, label: String, job: F) -> JobHandle<T>
    where
        F: Future<Output = Option<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let pool = self.name;
        let wrapped: Job = Box::pin(async move {
            let outcome = match AssertUnwindSafe(job).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    error!(
                        pool,
                        job = %label,
                        panic = %panic_message(panic.as_ref()),
                        "Job panicked; treating as no result"
                    );
                    None
                }
            };
            // The submitter may have stopped waiting; that is not an error.
            let _ = tx.send(outcome);
        });

        if self.queue.send(wrapped).await.is_err() {
            error!(pool = self.name, "Worker pool is closed; job dropped");
        }
        JobHandle { rx }
    }

    /// Close the queue and wait for every outstanding job to finish.
    #[instrument(level = "info", skip_all, fields(pool = self.name))]
    pub async fn shutdown(self) {
        let Self {
            name,
            queue,
            mut workers,
            ..
        } = self;
        drop(queue);
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(pool = name, error = %e, "Worker task ended abnormally");
            }
        }
        info!(pool = name, "Worker pool drained");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
