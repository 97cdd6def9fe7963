//! Serial background worker.
//!
//! A `BackgroundWorker<R>` owns a `BackgroundRunnable` on a single task and
//! feeds it tasks from a bounded mpsc queue, one at a time. Non-reentrant
//! resources (such as the embedded recognition module) live inside the
//! runnable and are therefore never touched concurrently.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Task handler executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    /// Process a single task. Tasks never overlap.
    async fn run(&mut self, task: Self::Task);

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

/// Cloneable sending side of a worker queue.
#[derive(Debug)]
pub struct Submitter<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for Submitter<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T: Send + 'static> Submitter<T> {
    /// Queue a task, waiting for capacity if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has stopped.
    pub async fn submit(&self, task: T) -> anyhow::Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| anyhow::anyhow!("worker channel closed"))
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Runs a `BackgroundRunnable` on its own task.
///
/// The worker task:
/// 1. Receives tasks from the queue
/// 2. Calls `BackgroundRunnable::run()` for each, in order
/// 3. Calls `BackgroundRunnable::shutdown()` when stopped or when every
///    submitter is gone
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the worker with a queue of `capacity` pending tasks.
    #[must_use]
    pub fn start(mut runnable: R, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }
            runnable.shutdown().await;
            debug!("background worker stopped");
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// A handle for queueing tasks; `None` once the worker has been stopped.
    #[must_use]
    pub fn submitter(&self) -> Option<Submitter<R::Task>> {
        self.tx.as_ref().map(|tx| Submitter { tx: tx.clone() })
    }

    /// Queue a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match self.submitter() {
            Some(submitter) => submitter.submit(task).await,
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stop the worker, waiting for the task in progress and `shutdown()`.
    ///
    /// Tasks still queued are dropped.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
