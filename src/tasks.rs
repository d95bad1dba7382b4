//! Supervised fire-and-forget jobs.
//!
//! Request handlers sometimes start work whose result the user never waits
//! for, such as allocating a ledger right after the user introduces
//! themselves. Those jobs go through a [`TaskQueue`]: a bounded channel
//! drained by one supervising loop that spawns each job and logs its
//! failure. A job never takes the request down with it.

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Channel buffer size for queued jobs.
const QUEUE_BUFFER: usize = 256;

type JobFuture = BoxFuture<'static, Result<(), String>>;

struct Job {
    name: &'static str,
    future: JobFuture,
}

/// Handle for submitting detached jobs.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<Job>,
}

impl TaskQueue {
    /// Starts the supervising loop. It stops when `shutdown` fires or every
    /// handle is dropped.
    pub fn start(shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_BUFFER);
        let supervisor = tokio::spawn(supervise(rx, shutdown));
        (TaskQueue { tx }, supervisor)
    }

    /// Queues a job. Returns false if the queue is full or closed, in which
    /// case the job is dropped.
    pub fn submit<F, E>(&self, name: &'static str, job: F) -> bool
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let future: JobFuture = Box::pin(async move { job.await.map_err(|e| e.to_string()) });
        match self.tx.try_send(Job { name, future }) {
            Ok(()) => {
                debug!(job = name, "Queued background job");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(job = name, "Background queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(job = name, "Background queue closed, dropping job");
                false
            }
        }
    }
}

async fn supervise(mut rx: mpsc::Receiver<Job>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown signal received, stopping background queue");
                break;
            }
            job = rx.recv() => {
                let Some(Job { name, future }) = job else {
                    debug!("Background queue closed");
                    break;
                };
                tokio::spawn(async move {
                    match future.await {
                        Ok(()) => debug!(job = name, "Background job finished"),
                        Err(e) => error!(job = name, error = %e, "Background job failed"),
                    }
                });
            }
        }
    }
}
