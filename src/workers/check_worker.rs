use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{JobHandler, WorkerError};
use crate::alerting;
use crate::db::models::{AlertType, MonitorStatus, RunGate};
use crate::db::stores::{CheckRunStore, MonitorStore};
use crate::probe::{ProbeExecutor, ProbeSpec};
use crate::queue::{
    AlertCandidate, CheckJobPayload, CheckResultSummary, ClaimedJob, JobQueue, RetryPolicy,
    Trigger, CHECKS_QUEUE, NOTIFICATIONS_QUEUE,
};

/// How a check job ended, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckDisposition {
    Processed { alert: Option<AlertType> },
    /// Same check-run id delivered twice; the first delivery already did the work.
    DuplicateRun,
    /// Monitor deleted after the job was scheduled. Benign.
    MonitorMissing,
    /// Disabled monitors only run when triggered manually.
    MonitorDisabled,
}

pub struct CheckWorker {
    monitors: Arc<dyn MonitorStore>,
    check_runs: Arc<dyn CheckRunStore>,
    queue: Arc<dyn JobQueue>,
    probe: ProbeExecutor,
    notification_policy: RetryPolicy,
}

impl CheckWorker {
    pub fn new(
        monitors: Arc<dyn MonitorStore>,
        check_runs: Arc<dyn CheckRunStore>,
        queue: Arc<dyn JobQueue>,
        probe: ProbeExecutor,
        notification_policy: RetryPolicy,
    ) -> Self {
        Self {
            monitors,
            check_runs,
            queue,
            probe,
            notification_policy,
        }
    }

    /// Runs one check job end to end. Probe-level failures (timeout,
    /// connection error, assertion mismatch) are normal down outcomes; only
    /// storage and queue errors bubble up as job failures.
    pub async fn process(
        &self,
        payload: &CheckJobPayload,
    ) -> Result<CheckDisposition, WorkerError> {
        // Write-ahead marker doubles as the duplicate-delivery guard.
        match self
            .check_runs
            .begin(&payload.check_run_id, payload.monitor_id)
            .await?
        {
            RunGate::AlreadyProcessed => return Ok(CheckDisposition::DuplicateRun),
            RunGate::Fresh | RunGate::Retry => {}
        }

        let Some(monitor) = self.monitors.get(payload.monitor_id).await? else {
            return Ok(CheckDisposition::MonitorMissing);
        };
        if !monitor.enabled && payload.trigger != Trigger::Manual {
            return Ok(CheckDisposition::MonitorDisabled);
        }
        let previous_status = monitor.last_status;

        let spec = ProbeSpec {
            method: monitor.method.clone(),
            url: monitor.url.clone(),
            headers: monitor.headers.clone(),
            body: monitor.body.clone(),
            timeout: Duration::from_millis(monitor.timeout_ms.max(1) as u64),
            assertions: monitor.assertions.clone(),
        };
        let outcome = self.probe.execute(&spec).await;

        let applied = self
            .monitors
            .apply_check_outcome(&payload.check_run_id, monitor.id, &outcome)
            .await?;
        let new_status = if outcome.ok {
            MonitorStatus::Up
        } else {
            MonitorStatus::Down
        };

        let alert = alerting::decide(
            previous_status,
            new_status,
            applied.consecutive_fails,
            monitor.alert_threshold,
        );
        if let Some(alert_type) = alert {
            let candidate = AlertCandidate {
                monitor_id: monitor.id,
                check_run_id: payload.check_run_id.clone(),
                alert_type,
                history_id: applied.history_id,
                previous_status,
                new_status,
                result: CheckResultSummary {
                    status_code: outcome.status_code,
                    response_time_ms: outcome.response_time_ms,
                    error: outcome.error.clone(),
                    checked_at: outcome.checked_at,
                },
            };
            self.queue
                .enqueue(
                    NOTIFICATIONS_QUEUE,
                    serde_json::to_value(&candidate)?,
                    &self.notification_policy,
                )
                .await?;
        }

        Ok(CheckDisposition::Processed { alert })
    }
}

#[async_trait]
impl JobHandler for CheckWorker {
    fn queue_name(&self) -> &'static str {
        CHECKS_QUEUE
    }

    async fn handle(&self, job: &ClaimedJob) -> Result<(), WorkerError> {
        let payload: CheckJobPayload = serde_json::from_value(job.payload.clone())?;
        let disposition = self.process(&payload).await?;
        info!(
            monitor_id = %payload.monitor_id,
            check_run_id = %payload.check_run_id,
            trigger = ?payload.trigger,
            ?disposition,
            "Check job finished."
        );
        Ok(())
    }
}
