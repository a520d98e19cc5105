//! The recurring-check registry and the loop that turns due schedules into
//! check jobs.
//!
//! One schedule row exists per enabled monitor, addressed by the
//! deterministic key `monitor:<id>`. The CRUD layer calls
//! [`ScheduleRegistry::upsert_schedule`] / [`ScheduleRegistry::remove_schedule`]
//! whenever a monitor is created, edited, disabled or deleted; the scheduler
//! loop owns firing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::queue::{CheckJobPayload, JobQueue, QueueError, RetryPolicy, Trigger, CHECKS_QUEUE};

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("schedule storage error: {0}")]
    Database(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for ScheduleError {
    fn from(err: sqlx::Error) -> Self {
        ScheduleError::Database(err.to_string())
    }
}

pub fn job_key(monitor_id: Uuid) -> String {
    format!("monitor:{monitor_id}")
}

/// The collaborator surface the CRUD layer drives.
#[derive(Clone)]
pub struct ScheduleRegistry {
    pool: PgPool,
    queue: Arc<dyn JobQueue>,
    check_policy: RetryPolicy,
}

impl ScheduleRegistry {
    pub fn new(pool: PgPool, queue: Arc<dyn JobQueue>, check_policy: RetryPolicy) -> Self {
        Self {
            pool,
            queue,
            check_policy,
        }
    }

    /// Installs or atomically replaces the recurring check for a monitor.
    /// Replacing discards pending firings of the old schedule; there is no
    /// window in which both fire.
    pub async fn upsert_schedule(
        &self,
        monitor_id: Uuid,
        interval_minutes: i32,
    ) -> Result<(), ScheduleError> {
        let every_ms = i64::from(interval_minutes.max(1)) * 60_000;
        let key = job_key(monitor_id);

        sqlx::query(
            r#"
            INSERT INTO schedules (job_key, monitor_id, every_ms, next_fire_at)
            VALUES ($1, $2, $3, now() + ($3 * interval '1 millisecond'))
            ON CONFLICT (job_key) DO UPDATE
            SET every_ms = EXCLUDED.every_ms,
                next_fire_at = EXCLUDED.next_fire_at,
                updated_at = now()
            "#,
        )
        .bind(&key)
        .bind(monitor_id)
        .bind(every_ms)
        .execute(&self.pool)
        .await?;

        let discarded = self.queue.cancel_keyed(CHECKS_QUEUE, &key).await?;
        if discarded > 0 {
            debug!(%monitor_id, discarded, "Discarded pending firings of replaced schedule.");
        }
        info!(%monitor_id, every_ms, "Installed recurring check schedule.");
        Ok(())
    }

    /// Removes the recurring check for a monitor. Removing a schedule that
    /// does not exist is not an error.
    pub async fn remove_schedule(&self, monitor_id: Uuid) -> Result<(), ScheduleError> {
        let key = job_key(monitor_id);
        sqlx::query("DELETE FROM schedules WHERE job_key = $1")
            .bind(&key)
            .execute(&self.pool)
            .await?;
        self.queue.cancel_keyed(CHECKS_QUEUE, &key).await?;
        info!(%monitor_id, "Removed recurring check schedule.");
        Ok(())
    }

    /// Enqueues a one-off manual check, returning the minted check-run id.
    pub async fn enqueue_ad_hoc_check(&self, monitor_id: Uuid) -> Result<String, ScheduleError> {
        let check_run_id = Uuid::new_v4().to_string();
        let payload = CheckJobPayload {
            monitor_id,
            check_run_id: check_run_id.clone(),
            trigger: Trigger::Manual,
        };
        self.queue
            .enqueue(CHECKS_QUEUE, serde_json::to_value(&payload)?, &self.check_policy)
            .await?;
        info!(%monitor_id, %check_run_id, "Enqueued ad-hoc check.");
        Ok(check_run_id)
    }
}

/// Re-aligns the schedule table with the monitor definitions: installs
/// schedules that are missing or carry a stale interval, removes schedules
/// whose monitor is gone or disabled. Run at startup to repair any drift
/// left behind by registry mutations that failed as non-fatal warnings.
pub async fn reconcile_schedules(
    pool: &PgPool,
    registry: &ScheduleRegistry,
) -> Result<(), ScheduleError> {
    use std::collections::HashMap;

    #[derive(FromRow)]
    struct EnabledMonitor {
        id: Uuid,
        interval_minutes: i32,
    }

    #[derive(FromRow)]
    struct LiveSchedule {
        monitor_id: Uuid,
        every_ms: i64,
    }

    let desired: Vec<EnabledMonitor> =
        sqlx::query_as("SELECT id, interval_minutes FROM monitors WHERE enabled = TRUE")
            .fetch_all(pool)
            .await?;
    let live: Vec<LiveSchedule> = sqlx::query_as("SELECT monitor_id, every_ms FROM schedules")
        .fetch_all(pool)
        .await?;

    let desired_map: HashMap<Uuid, i32> =
        desired.into_iter().map(|m| (m.id, m.interval_minutes)).collect();
    let live_map: HashMap<Uuid, i64> =
        live.into_iter().map(|s| (s.monitor_id, s.every_ms)).collect();

    let mut installed = 0u32;
    let mut removed = 0u32;

    for (&monitor_id, &interval_minutes) in &desired_map {
        let wanted_every_ms = i64::from(interval_minutes.max(1)) * 60_000;
        if live_map.get(&monitor_id) == Some(&wanted_every_ms) {
            continue;
        }
        match registry.upsert_schedule(monitor_id, interval_minutes).await {
            Ok(()) => installed += 1,
            Err(e) => warn!(%monitor_id, error = %e, "Failed to reinstall schedule during reconciliation."),
        }
    }

    for &monitor_id in live_map.keys() {
        if desired_map.contains_key(&monitor_id) {
            continue;
        }
        match registry.remove_schedule(monitor_id).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(%monitor_id, error = %e, "Failed to remove stale schedule during reconciliation."),
        }
    }

    info!(installed, removed, "Schedule reconciliation finished.");
    Ok(())
}

#[derive(FromRow)]
struct DueSchedule {
    job_key: String,
    monitor_id: Uuid,
}

/// Claims every due schedule and advances its `next_fire_at` in the same
/// statement, so a crash between claiming and enqueuing costs at most one
/// firing and never repeats one.
async fn fire_due_schedules(
    pool: &PgPool,
    queue: &Arc<dyn JobQueue>,
    check_policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<u32, ScheduleError> {
    let due = sqlx::query_as::<_, DueSchedule>(
        r#"
        UPDATE schedules
        SET next_fire_at = $1 + (every_ms * interval '1 millisecond'),
            updated_at = now()
        WHERE job_key IN (
            SELECT job_key FROM schedules
            WHERE next_fire_at <= $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING job_key, monitor_id
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    let mut fired = 0;
    for schedule in due {
        let payload = CheckJobPayload {
            monitor_id: schedule.monitor_id,
            check_run_id: Uuid::new_v4().to_string(),
            trigger: Trigger::Auto,
        };
        let payload = match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(e) => {
                error!(monitor_id = %schedule.monitor_id, error = %e, "Failed to serialize check payload.");
                continue;
            }
        };
        match queue
            .enqueue_keyed(CHECKS_QUEUE, &schedule.job_key, payload, check_policy)
            .await
        {
            Ok(Some(_)) => fired += 1,
            Ok(None) => {
                debug!(
                    monitor_id = %schedule.monitor_id,
                    "Previous firing still in flight; skipping this interval."
                );
            }
            Err(e) => {
                // Schedule drift is surfaced, not fatal; the next tick tries again.
                warn!(monitor_id = %schedule.monitor_id, error = %e, "Failed to enqueue scheduled check.");
            }
        }
    }
    Ok(fired)
}

/// The scheduler loop. Ticks until the shutdown signal flips.
pub async fn run_scheduler(
    pool: PgPool,
    queue: Arc<dyn JobQueue>,
    check_policy: RetryPolicy,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(tick_ms = tick.as_millis() as u64, "Scheduler started.");
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match fire_due_schedules(&pool, &queue, &check_policy, Utc::now()).await {
                    Ok(fired) if fired > 0 => debug!(fired, "Scheduler tick enqueued checks."),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Scheduler tick failed."),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Scheduler stopping.");
                    break;
                }
            }
        }
    }
}
