//! Storage contracts consumed by the scheduler and both worker pools.
//!
//! Workers never hold a database handle directly; they receive these traits
//! so the pipeline logic can be exercised against in-memory fakes. The
//! Postgres implementations keep every monitor mutation a single conditional
//! statement — concurrent workers coordinate through the database, not
//! through shared memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{
    AlertSlot, AlertType, AppliedCheck, LogGate, Monitor, OwnerPreferences, RunGate,
};
use crate::probe::ProbeOutcome;

mod check_run_store;
mod monitor_store;
mod notification_log_store;
mod owner_store;

pub use check_run_store::PgCheckRunStore;
pub use monitor_store::PgMonitorStore;
pub use notification_log_store::PgNotificationLogStore;
pub use owner_store::PgOwnerPreferenceStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Read and conditional-write access to monitor state.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Monitor>, StoreError>;

    /// The atomic unit at the end of a check: append the history row, apply
    /// the status/fail-counter transition as a single conditional update, and
    /// mark the check run processed. All three commit or none do.
    async fn apply_check_outcome(
        &self,
        check_run_id: &str,
        monitor_id: Uuid,
        outcome: &ProbeOutcome,
    ) -> Result<AppliedCheck, StoreError>;

    /// Sole cooldown authority: atomically stamp `last_alert_at = now` iff
    /// the previous stamp is at least `cooldown_minutes` old (or absent, or
    /// the cooldown is non-positive). Returns `None` when the monitor is
    /// still cooling down or no longer exists.
    async fn claim_alert_slot(
        &self,
        monitor_id: Uuid,
        cooldown_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertSlot>, StoreError>;

    /// Hand back a claimed slot after a failed send so the retry is not
    /// swallowed by our own stamp. Compare-and-set: a slot claimed by
    /// someone else in the meantime is left alone.
    async fn release_alert_slot(
        &self,
        monitor_id: Uuid,
        slot: AlertSlot,
    ) -> Result<(), StoreError>;
}

/// Write-ahead idempotency markers for dispatched check jobs.
#[async_trait]
pub trait CheckRunStore: Send + Sync {
    async fn begin(&self, check_run_id: &str, monitor_id: Uuid) -> Result<RunGate, StoreError>;
}

/// Alert idempotency rows keyed by (check run, alert type).
#[async_trait]
pub trait NotificationLogStore: Send + Sync {
    async fn acquire(
        &self,
        check_run_id: &str,
        alert_type: AlertType,
        monitor_id: Uuid,
    ) -> Result<LogGate, StoreError>;

    async fn mark_sent(
        &self,
        check_run_id: &str,
        alert_type: AlertType,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Resolves the alerting preferences of a monitor's owner.
#[async_trait]
pub trait OwnerPreferenceStore: Send + Sync {
    async fn for_monitor(&self, monitor_id: Uuid)
        -> Result<Option<OwnerPreferences>, StoreError>;
}
