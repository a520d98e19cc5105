use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{MonitorStore, StoreError};
use crate::db::models::{AlertSlot, AppliedCheck, Monitor, MonitorFromDb, MonitorStatus};
use crate::probe::ProbeOutcome;

#[derive(Clone)]
pub struct PgMonitorStore {
    pool: PgPool,
}

impl PgMonitorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MonitorStore for PgMonitorStore {
    async fn get(&self, id: Uuid) -> Result<Option<Monitor>, StoreError> {
        let row = sqlx::query_as::<_, MonitorFromDb>(
            r#"
            SELECT id, owner_id, name, url, method, headers, body, interval_minutes,
                   timeout_ms, assertions, enabled, last_status, last_response_time_ms,
                   last_checked_at, consecutive_fails, alert_threshold, last_alert_at
            FROM monitors WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Monitor::from))
    }

    async fn apply_check_outcome(
        &self,
        check_run_id: &str,
        monitor_id: Uuid,
        outcome: &ProbeOutcome,
    ) -> Result<AppliedCheck, StoreError> {
        let new_status = if outcome.ok {
            MonitorStatus::Up
        } else {
            MonitorStatus::Down
        };
        let history_id = Uuid::new_v4();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO check_history
                (id, monitor_id, check_run_id, status_code, response_time_ms, ok,
                 body_hash, response_snippet, error, checked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(history_id)
        .bind(monitor_id)
        .bind(check_run_id)
        .bind(outcome.status_code)
        .bind(outcome.response_time_ms)
        .bind(outcome.ok)
        .bind(outcome.body_hash.as_deref())
        .bind(outcome.response_snippet.as_deref())
        .bind(outcome.error.as_deref())
        .bind(outcome.checked_at)
        .execute(&mut *tx)
        .await?;

        // Increment-or-reset expressed in the statement itself; two workers
        // racing on the same monitor can never lose an update.
        let consecutive_fails: i32 = sqlx::query_scalar(
            r#"
            UPDATE monitors
            SET consecutive_fails = CASE WHEN $2 THEN 0 ELSE consecutive_fails + 1 END,
                last_status = $3,
                last_response_time_ms = $4,
                last_checked_at = $5,
                updated_at = now()
            WHERE id = $1
            RETURNING consecutive_fails
            "#,
        )
        .bind(monitor_id)
        .bind(outcome.ok)
        .bind(new_status.as_str())
        .bind(outcome.response_time_ms)
        .bind(outcome.checked_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE check_runs SET processed = TRUE WHERE id = $1")
            .bind(check_run_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(AppliedCheck {
            history_id,
            consecutive_fails,
        })
    }

    async fn claim_alert_slot(
        &self,
        monitor_id: Uuid,
        cooldown_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertSlot>, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE monitors
            SET last_alert_at = $2, updated_at = now()
            WHERE id = $1
              AND ($3 <= 0
                   OR last_alert_at IS NULL
                   OR last_alert_at <= $2 - make_interval(mins => $3))
            "#,
        )
        .bind(monitor_id)
        .bind(now)
        .bind(cooldown_minutes)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(Some(AlertSlot { claimed_at: now }))
        } else {
            Ok(None)
        }
    }

    async fn release_alert_slot(
        &self,
        monitor_id: Uuid,
        slot: AlertSlot,
    ) -> Result<(), StoreError> {
        // The claim only succeeded because any earlier stamp had already
        // aged past the cooldown, so clearing ours is equivalent to
        // restoring it for future gating decisions.
        sqlx::query(
            "UPDATE monitors SET last_alert_at = NULL, updated_at = now()
             WHERE id = $1 AND last_alert_at = $2",
        )
        .bind(monitor_id)
        .bind(slot.claimed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
