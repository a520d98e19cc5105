use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Last known state of a monitored endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Unknown,
    Up,
    Down,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Unknown => "unknown",
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
        }
    }

    /// Anything unrecognized is treated as `unknown` rather than failing the
    /// row decode; the column is owned by this crate so that only happens on
    /// a fresh monitor created before its first check.
    pub fn parse(s: &str) -> Self {
        match s {
            "up" => MonitorStatus::Up,
            "down" => MonitorStatus::Down,
            _ => MonitorStatus::Unknown,
        }
    }
}

/// Which kind of alert a candidate proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Down,
    Up,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Down => "down",
            AlertType::Up => "up",
        }
    }
}

/// A monitored endpoint definition plus its last known state.
///
/// Created and deleted by the CRUD layer; the check worker mutates the
/// status/fail/timing fields and the notification worker mutates
/// `last_alert_at`. Nothing else writes to this row.
#[derive(Debug, Clone)]
pub struct Monitor {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub interval_minutes: i32,
    pub timeout_ms: i32,
    pub assertions: Vec<String>,
    pub enabled: bool,
    pub last_status: MonitorStatus,
    pub last_response_time_ms: Option<i64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_fails: i32,
    pub alert_threshold: i32,
    pub last_alert_at: Option<DateTime<Utc>>,
}

/// Raw monitor row as stored; converted into [`Monitor`] after fetching.
#[derive(Debug, FromRow)]
pub struct MonitorFromDb {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: serde_json::Value,
    pub body: Option<String>,
    pub interval_minutes: i32,
    pub timeout_ms: i32,
    pub assertions: Vec<String>,
    pub enabled: bool,
    pub last_status: String,
    pub last_response_time_ms: Option<i64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_fails: i32,
    pub alert_threshold: i32,
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl From<MonitorFromDb> for Monitor {
    fn from(row: MonitorFromDb) -> Self {
        let headers = match row.headers {
            serde_json::Value::Object(map) => map
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                .collect(),
            _ => HashMap::new(),
        };
        Monitor {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            url: row.url,
            method: row.method,
            headers,
            body: row.body,
            interval_minutes: row.interval_minutes,
            timeout_ms: row.timeout_ms,
            assertions: row.assertions,
            enabled: row.enabled,
            last_status: MonitorStatus::parse(&row.last_status),
            last_response_time_ms: row.last_response_time_ms,
            last_checked_at: row.last_checked_at,
            consecutive_fails: row.consecutive_fails,
            alert_threshold: row.alert_threshold,
            last_alert_at: row.last_alert_at,
        }
    }
}

/// Alerting preferences of a monitor's owner, resolved per candidate so that
/// mid-flight preference changes take effect on retries.
#[derive(Debug, Clone, FromRow)]
pub struct OwnerPreferences {
    pub email: String,
    pub alerts_enabled: bool,
    pub alert_on_down: bool,
    pub alert_on_up: bool,
    pub cooldown_minutes: i32,
}

/// Result of the atomic check-outcome write: the history row id plus the
/// monitor's fail counter as it stands after the update.
#[derive(Debug, Clone, Copy)]
pub struct AppliedCheck {
    pub history_id: Uuid,
    pub consecutive_fails: i32,
}

/// A successfully claimed send window on a monitor's `last_alert_at`.
/// Held by the notification worker between claiming and sending; used to
/// hand the slot back if the send fails.
#[derive(Debug, Clone, Copy)]
pub struct AlertSlot {
    pub claimed_at: DateTime<Utc>,
}

/// Outcome of registering a check-run id before processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunGate {
    /// First time this id is seen; proceed.
    Fresh,
    /// The id exists but was never marked processed: a retry of a job whose
    /// earlier attempt died mid-flight. Proceed.
    Retry,
    /// Already fully processed; a duplicate delivery to be skipped.
    AlreadyProcessed,
}

/// Outcome of claiming the notification-log row for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogGate {
    /// Row inserted; this worker owns the incident.
    Acquired,
    /// Row exists but unsent: retry of a failed send attempt. Proceed.
    RetryUnsent,
    /// Row exists and the email went out. Duplicate candidate; skip.
    AlreadySent,
}
