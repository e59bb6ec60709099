//! FIFO operation queue for the visualization engine.

use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Serializes asynchronous operations: one at a time, in submission order.
///
/// A failing or panicking operation is reported to its own caller as
/// [`Error::EngineOperationFailed`] and never blocks the operations queued
/// behind it.
#[derive(Clone)]
pub struct OperationQueue {
    sender: mpsc::UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
}

impl OperationQueue {
    /// Creates a queue and spawns its worker task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        tokio::spawn(Self::worker(receiver, Arc::clone(&depth)));
        Self { sender, depth }
    }

    async fn worker(mut receiver: mpsc::UnboundedReceiver<Job>, depth: Arc<AtomicUsize>) {
        while let Some(job) = receiver.recv().await {
            job.await;
            let remaining = depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            metrics::gauge!("operation_queue_depth").set(remaining as f64);
        }
        tracing::debug!("Operation queue worker stopped");
    }

    /// Returns the number of queued and running operations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Enqueues an operation and returns a future for its outcome.
    ///
    /// The operation is enqueued when `run` is called, not when the returned
    /// future is first polled. `op` is invoked only once every earlier
    /// operation has finished.
    pub fn run<T, F, Fut>(
        &self,
        name: &str,
        op: F,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.run_with(name, op, |_| {})
    }

    /// Like [`run`](Self::run), with a hook that sees the outcome.
    ///
    /// `on_complete` runs on the queue worker after the operation finishes
    /// (including when it panicked) and before the next operation starts.
    pub fn run_with<T, F, Fut, C>(
        &self,
        name: &str,
        op: F,
        on_complete: C,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        C: FnOnce(&Result<T>) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let operation = name.to_string();
        let job_operation = operation.clone();

        let job: Job = Box::pin(async move {
            let outcome = match tokio::spawn(async move { op().await }).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(Self::failure(&job_operation, err)),
                Err(join_err) => {
                    let cause = if join_err.is_panic() {
                        "operation panicked".to_string()
                    } else {
                        join_err.to_string()
                    };
                    Err(Self::failure(
                        &job_operation,
                        Error::EngineOperationFailed {
                            operation: job_operation.clone(),
                            cause,
                        },
                    ))
                },
            };
            on_complete(&outcome);
            // The caller may have dropped its future
            let _ = tx.send(outcome);
        });

        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("operation_queue_depth").set(depth as f64);
        if self.sender.send(job).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }

        async move {
            rx.await.unwrap_or_else(|_| {
                Err(Error::EngineOperationFailed {
                    operation,
                    cause: "operation queue closed".to_string(),
                })
            })
        }
    }

    /// Enqueues an operation without waiting for it.
    ///
    /// Failures are logged by the queue.
    pub fn submit<F, Fut>(&self, name: &str, op: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        drop(self.run(name, op));
    }

    fn failure(operation: &str, err: Error) -> Error {
        let err = match err {
            err @ Error::EngineOperationFailed { .. } => err,
            other => Error::EngineOperationFailed {
                operation: operation.to_string(),
                cause: other.to_string(),
            },
        };
        metrics::counter!("operation_queue_failures_total", "operation" => operation.to_string())
            .increment(1);
        tracing::warn!(operation, error = %err, "Queued engine operation failed");
        err
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}
