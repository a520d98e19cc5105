//! The alert decision state machine: `unknown → up ⇄ down`.
//!
//! Evaluated once per processed check. The check worker emits a candidate
//! when this returns `Some`; whether mail actually goes out is decided later
//! by the notification worker (preferences, dedup, cooldown).

use crate::db::models::{AlertType, MonitorStatus};

/// Decides alert eligibility from the transition of a single check.
///
/// `previous` is the status as loaded before the check was applied;
/// `consecutive_fails` is the counter after it. A down alert only becomes
/// eligible once the failure streak reaches the monitor's threshold, so the
/// first alert fires on the Nth consecutive failure rather than the first.
/// A recovery alert requires the previous status to have been `down`.
pub fn decide(
    previous: MonitorStatus,
    new: MonitorStatus,
    consecutive_fails: i32,
    alert_threshold: i32,
) -> Option<AlertType> {
    let threshold = alert_threshold.max(1);
    match new {
        MonitorStatus::Down if consecutive_fails >= threshold => Some(AlertType::Down),
        MonitorStatus::Up if previous == MonitorStatus::Down => Some(AlertType::Up),
        _ => None,
    }
}
