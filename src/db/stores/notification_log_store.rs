use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{NotificationLogStore, StoreError};
use crate::db::models::{AlertType, LogGate};

#[derive(Clone)]
pub struct PgNotificationLogStore {
    pool: PgPool,
}

impl PgNotificationLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLogStore for PgNotificationLogStore {
    async fn acquire(
        &self,
        check_run_id: &str,
        alert_type: AlertType,
        monitor_id: Uuid,
    ) -> Result<LogGate, StoreError> {
        let inserted = sqlx::query(
            "INSERT INTO notification_logs (check_run_id, alert_type, monitor_id, sent)
             VALUES ($1, $2, $3, FALSE)
             ON CONFLICT (check_run_id, alert_type) DO NOTHING",
        )
        .bind(check_run_id)
        .bind(alert_type.as_str())
        .bind(monitor_id)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(LogGate::Acquired);
        }

        let sent: bool = sqlx::query_scalar(
            "SELECT sent FROM notification_logs WHERE check_run_id = $1 AND alert_type = $2",
        )
        .bind(check_run_id)
        .bind(alert_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        if sent {
            Ok(LogGate::AlreadySent)
        } else {
            Ok(LogGate::RetryUnsent)
        }
    }

    async fn mark_sent(
        &self,
        check_run_id: &str,
        alert_type: AlertType,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE notification_logs SET sent = TRUE, sent_at = $3
             WHERE check_run_id = $1 AND alert_type = $2 AND sent = FALSE",
        )
        .bind(check_run_id)
        .bind(alert_type.as_str())
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
