use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{AlertType, MonitorStatus};

pub const CHECKS_QUEUE: &str = "checks";
pub const NOTIFICATIONS_QUEUE: &str = "notifications";

/// What caused a check job to be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Auto,
    Manual,
}

/// Payload of a job on the checks queue. `check_run_id` is minted once at
/// dispatch time and is the idempotency token for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckJobPayload {
    pub monitor_id: Uuid,
    pub check_run_id: String,
    pub trigger: Trigger,
}

/// The probe result fields an alert email needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResultSummary {
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Payload of a job on the notifications queue: a proposal to alert,
/// subject to preference, dedup and cooldown filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCandidate {
    pub monitor_id: Uuid,
    pub check_run_id: String,
    pub alert_type: AlertType,
    pub history_id: Uuid,
    pub previous_status: MonitorStatus,
    pub new_status: MonitorStatus,
    pub result: CheckResultSummary,
}

/// Bounded attempts with exponential backoff, fixed per queue at enqueue
/// time and stored on the job row.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub backoff_base: Duration,
}

/// A job leased by a worker. Attempt counters reflect the claim that handed
/// this value out (the claim itself increments `attempts`).
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub queue: String,
    pub job_key: Option<String>,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
}

impl ClaimedJob {
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Where a failed job went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFate {
    Retrying { run_at: DateTime<Utc> },
    Dead,
}

/// Exponential backoff with a little jitter so a burst of failures does not
/// come back as a burst of retries.
pub fn backoff_delay(base: Duration, attempt: i32, jitter_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 16) as u32;
    let scaled = base.as_millis() as u64 * 2u64.saturating_pow(exponent);
    Duration::from_millis(scaled + jitter_ms)
}
