use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{CheckRunStore, StoreError};
use crate::db::models::RunGate;

#[derive(Clone)]
pub struct PgCheckRunStore {
    pool: PgPool,
}

impl PgCheckRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckRunStore for PgCheckRunStore {
    async fn begin(&self, check_run_id: &str, monitor_id: Uuid) -> Result<RunGate, StoreError> {
        let inserted = sqlx::query(
            "INSERT INTO check_runs (id, monitor_id, processed) VALUES ($1, $2, FALSE)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(check_run_id)
        .bind(monitor_id)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(RunGate::Fresh);
        }

        let processed: bool =
            sqlx::query_scalar("SELECT processed FROM check_runs WHERE id = $1")
                .bind(check_run_id)
                .fetch_one(&self.pool)
                .await?;

        if processed {
            Ok(RunGate::AlreadyProcessed)
        } else {
            Ok(RunGate::Retry)
        }
    }
}
