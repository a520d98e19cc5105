//! The two bounded worker pools and their shared runner.
//!
//! Workers coordinate exclusively through the durable stores and queues they
//! are handed at construction; a handler returning `Err` sends the job back
//! to the queue for backoff retry (or the dead-letter state once its budget
//! is spent).

pub mod check_worker;
pub mod notification_worker;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::stores::StoreError;
use crate::notifications::MailerError;
use crate::queue::{JobFate, JobQueue, QueueError};

pub use check_worker::{CheckDisposition, CheckWorker};
pub use notification_worker::{NotificationWorker, NotifyDisposition};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Mail(#[from] MailerError),
    #[error("template error: {0}")]
    Template(#[from] tera::Error),
    #[error("malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// One job type's processing logic, shared by every worker in its pool.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    fn queue_name(&self) -> &'static str;
    async fn handle(&self, job: &crate::queue::ClaimedJob) -> Result<(), WorkerError>;
}

/// Spawns `concurrency` pollers over the handler's queue. Each claims one
/// job at a time, so the pool never has more than `concurrency` jobs in
/// flight. Returns the join handles so shutdown can be awaited.
pub fn spawn_pool<H: JobHandler>(
    queue: Arc<dyn JobQueue>,
    handler: Arc<H>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let queue_name = handler.queue_name();
    info!(queue = queue_name, concurrency, "Worker pool started.");

    (0..concurrency)
        .map(|worker_idx| {
            let queue = queue.clone();
            let handler = handler.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    match queue.claim(queue_name).await {
                        Ok(Some(job)) => {
                            let job_id = job.id;
                            match handler.handle(&job).await {
                                Ok(()) => {
                                    if let Err(e) = queue.complete(&job).await {
                                        error!(queue = queue_name, %job_id, error = %e, "Failed to ack completed job.");
                                    }
                                }
                                Err(job_error) => {
                                    match queue.fail(&job, &job_error.to_string()).await {
                                        Ok(JobFate::Retrying { run_at }) => {
                                            warn!(
                                                queue = queue_name,
                                                %job_id,
                                                error = %job_error,
                                                retry_at = %run_at,
                                                "Job failed; scheduled for retry."
                                            );
                                        }
                                        Ok(JobFate::Dead) => {
                                            error!(
                                                queue = queue_name,
                                                %job_id,
                                                error = %job_error,
                                                "Job exhausted its attempts; dead-lettered."
                                            );
                                        }
                                        Err(e) => {
                                            error!(queue = queue_name, %job_id, error = %e, "Failed to record job failure.");
                                        }
                                    }
                                }
                            }
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = tokio::time::sleep(poll_interval) => {}
                                changed = shutdown.changed() => {
                                    if changed.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            error!(queue = queue_name, error = %e, "Failed to claim job; backing off.");
                            tokio::time::sleep(poll_interval).await;
                        }
                    }
                }
                info!(queue = queue_name, worker_idx, "Worker stopped.");
            })
        })
        .collect()
}
