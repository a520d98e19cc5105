use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::{JobHandler, WorkerError};
use crate::db::models::{AlertType, LogGate};
use crate::db::stores::{MonitorStore, NotificationLogStore, OwnerPreferenceStore};
use crate::notifications::{templates, Mailer};
use crate::queue::{AlertCandidate, ClaimedJob, NOTIFICATIONS_QUEUE};

/// How an alert candidate ended, for logging and tests. Everything except
/// `Sent` is an intentional skip, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDisposition {
    Sent,
    /// Another delivery of the same (check run, alert type) already sent.
    DuplicateCandidate,
    /// Monitor deleted while the candidate was in flight.
    MonitorMissing,
    /// No owner row, or the owner has no usable recipient address.
    NoRecipient,
    /// The owner's master switch, or this alert type, is off.
    AlertsDisabled,
    /// A send for this monitor happened less than the cooldown ago.
    Cooldown,
}

pub struct NotificationWorker {
    monitors: Arc<dyn MonitorStore>,
    owners: Arc<dyn OwnerPreferenceStore>,
    logs: Arc<dyn NotificationLogStore>,
    mailer: Arc<dyn Mailer>,
}

impl NotificationWorker {
    pub fn new(
        monitors: Arc<dyn MonitorStore>,
        owners: Arc<dyn OwnerPreferenceStore>,
        logs: Arc<dyn NotificationLogStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            monitors,
            owners,
            logs,
            mailer,
        }
    }

    /// Filters and possibly sends one alert candidate.
    ///
    /// Gates run in order: dedup, preferences/recipient, cooldown. The
    /// cooldown claim is the only cooldown authority in the system — it
    /// stamps `last_alert_at` atomically before the send, so two candidates
    /// for the same monitor racing through this code can never both mail.
    /// Preference and cooldown state is re-read on every attempt, so a retry
    /// after a transport failure honors changes made in between.
    pub async fn process(
        &self,
        candidate: &AlertCandidate,
    ) -> Result<NotifyDisposition, WorkerError> {
        match self
            .logs
            .acquire(
                &candidate.check_run_id,
                candidate.alert_type,
                candidate.monitor_id,
            )
            .await?
        {
            LogGate::AlreadySent => return Ok(NotifyDisposition::DuplicateCandidate),
            LogGate::Acquired | LogGate::RetryUnsent => {}
        }

        let Some(monitor) = self.monitors.get(candidate.monitor_id).await? else {
            return Ok(NotifyDisposition::MonitorMissing);
        };
        let Some(prefs) = self.owners.for_monitor(candidate.monitor_id).await? else {
            return Ok(NotifyDisposition::NoRecipient);
        };

        if !prefs.alerts_enabled {
            return Ok(NotifyDisposition::AlertsDisabled);
        }
        let type_enabled = match candidate.alert_type {
            AlertType::Down => prefs.alert_on_down,
            AlertType::Up => prefs.alert_on_up,
        };
        if !type_enabled {
            return Ok(NotifyDisposition::AlertsDisabled);
        }
        if prefs.email.trim().is_empty() {
            return Ok(NotifyDisposition::NoRecipient);
        }

        let now = Utc::now();
        let Some(slot) = self
            .monitors
            .claim_alert_slot(monitor.id, prefs.cooldown_minutes, now)
            .await?
        else {
            return Ok(NotifyDisposition::Cooldown);
        };

        let email = templates::render(&monitor.name, &monitor.url, candidate)?;
        match self.mailer.send(&prefs.email, &email).await {
            Ok(()) => {
                self.logs
                    .mark_sent(&candidate.check_run_id, candidate.alert_type, now)
                    .await?;
                Ok(NotifyDisposition::Sent)
            }
            Err(mail_error) => {
                // Give the slot back so the retry is not blocked by our own
                // stamp; the unsent log row stays behind as the audit trail.
                if let Err(release_error) =
                    self.monitors.release_alert_slot(monitor.id, slot).await
                {
                    warn!(
                        monitor_id = %monitor.id,
                        error = %release_error,
                        "Failed to release alert slot after send failure."
                    );
                }
                Err(WorkerError::Mail(mail_error))
            }
        }
    }
}

#[async_trait]
impl JobHandler for NotificationWorker {
    fn queue_name(&self) -> &'static str {
        NOTIFICATIONS_QUEUE
    }

    async fn handle(&self, job: &ClaimedJob) -> Result<(), WorkerError> {
        let candidate: AlertCandidate = serde_json::from_value(job.payload.clone())?;
        let disposition = self.process(&candidate).await?;
        info!(
            monitor_id = %candidate.monitor_id,
            check_run_id = %candidate.check_run_id,
            alert_type = candidate.alert_type.as_str(),
            ?disposition,
            "Alert candidate finished."
        );
        Ok(())
    }
}
