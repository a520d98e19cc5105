use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::job::{backoff_delay, ClaimedJob, JobFate, RetryPolicy};
use super::{JobQueue, QueueError};

/// Durable queue on the shared Postgres instance. Claiming uses
/// `FOR UPDATE SKIP LOCKED` so any number of workers can pull from the same
/// queue without handing a job out twice; delivery is still at-least-once
/// because a worker can die after processing but before acking.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn claimed_from_row(row: PgRow) -> Result<ClaimedJob, sqlx::Error> {
    Ok(ClaimedJob {
        id: row.try_get("id")?,
        queue: row.try_get("queue")?,
        job_key: row.try_get("job_key")?,
        payload: row.try_get("payload")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        backoff_base_ms: row.try_get("backoff_base_ms")?,
    })
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        policy: &RetryPolicy,
    ) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, queue, payload, state, max_attempts, backoff_base_ms, run_at)
            VALUES ($1, $2, $3, 'pending', $4, $5, now())
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(&payload)
        .bind(policy.max_attempts)
        .bind(policy.backoff_base.as_millis() as i64)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn enqueue_keyed(
        &self,
        queue: &str,
        job_key: &str,
        payload: serde_json::Value,
        policy: &RetryPolicy,
    ) -> Result<Option<Uuid>, QueueError> {
        let id = Uuid::new_v4();
        // One live job per key: a recurring firing is dropped while the
        // previous one for the same monitor is still pending or running.
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (id, queue, job_key, payload, state, max_attempts, backoff_base_ms, run_at)
            SELECT $1, $2, $3, $4, 'pending', $5, $6, now()
            WHERE NOT EXISTS (
                SELECT 1 FROM jobs
                WHERE queue = $2 AND job_key = $3 AND state IN ('pending', 'running')
            )
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(job_key)
        .bind(&payload)
        .bind(policy.max_attempts)
        .bind(policy.backoff_base.as_millis() as i64)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            Ok(Some(id))
        } else {
            Ok(None)
        }
    }

    async fn cancel_keyed(&self, queue: &str, job_key: &str) -> Result<u64, QueueError> {
        let deleted =
            sqlx::query("DELETE FROM jobs WHERE queue = $1 AND job_key = $2 AND state = 'pending'")
                .bind(queue)
                .bind(job_key)
                .execute(&self.pool)
                .await?;
        Ok(deleted.rows_affected())
    }

    async fn claim(&self, queue: &str) -> Result<Option<ClaimedJob>, QueueError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'running', attempts = attempts + 1, updated_at = now()
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = $1 AND state = 'pending' AND run_at <= now()
                ORDER BY run_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, queue, job_key, payload, attempts, max_attempts, backoff_base_ms
            "#,
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;

        row.map(claimed_from_row)
            .transpose()
            .map_err(QueueError::from)
    }

    async fn complete(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, job: &ClaimedJob, error: &str) -> Result<JobFate, QueueError> {
        if job.attempts_exhausted() {
            sqlx::query(
                "UPDATE jobs SET state = 'dead', last_error = $2, updated_at = now() WHERE id = $1",
            )
            .bind(job.id)
            .bind(error)
            .execute(&self.pool)
            .await?;
            return Ok(JobFate::Dead);
        }

        let jitter_ms = rand::rng().random_range(0..500);
        let delay = backoff_delay(
            std::time::Duration::from_millis(job.backoff_base_ms.max(0) as u64),
            job.attempts,
            jitter_ms,
        );
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));

        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', run_at = $2, last_error = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(JobFate::Retrying { run_at })
    }
}
