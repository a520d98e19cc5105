//! Durable job queues backed by the shared database.
//!
//! Two logical queues — `checks` and `notifications` — share one table.
//! Jobs carry their own retry budget; a job that exhausts it is parked in
//! state `dead` where it stays visible to operators instead of vanishing.

pub mod job;
mod pg;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use job::{
    AlertCandidate, CheckJobPayload, CheckResultSummary, ClaimedJob, JobFate, RetryPolicy,
    Trigger, CHECKS_QUEUE, NOTIFICATIONS_QUEUE,
};
pub use pg::PgJobQueue;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Database(err.to_string())
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job with no key; always accepted.
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        policy: &RetryPolicy,
    ) -> Result<Uuid, QueueError>;

    /// Enqueues under a deterministic key, deduplicating against a live job
    /// with the same key. Returns `None` when dropped as a duplicate.
    async fn enqueue_keyed(
        &self,
        queue: &str,
        job_key: &str,
        payload: serde_json::Value,
        policy: &RetryPolicy,
    ) -> Result<Option<Uuid>, QueueError>;

    /// Discards pending jobs under a key. Running jobs finish; they are
    /// handled by the check worker's own monitor-state gates.
    async fn cancel_keyed(&self, queue: &str, job_key: &str) -> Result<u64, QueueError>;

    /// Leases the next due job, if any.
    async fn claim(&self, queue: &str) -> Result<Option<ClaimedJob>, QueueError>;

    /// Acknowledges a finished job and removes it.
    async fn complete(&self, job: &ClaimedJob) -> Result<(), QueueError>;

    /// Records a failed attempt: reschedules with backoff while the budget
    /// lasts, otherwise dead-letters the job.
    async fn fail(&self, job: &ClaimedJob, error: &str) -> Result<JobFate, QueueError>;
}
