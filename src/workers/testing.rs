//! In-memory fakes for the storage, queue and mail contracts, plus a tiny
//! canned HTTP server. Test-only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::db::models::{
    AlertSlot, AlertType, AppliedCheck, LogGate, Monitor, MonitorStatus, OwnerPreferences,
    RunGate,
};
use crate::db::stores::{
    CheckRunStore, MonitorStore, NotificationLogStore, OwnerPreferenceStore, StoreError,
};
use crate::notifications::{Mailer, MailerError, OutgoingEmail};
use crate::probe::ProbeOutcome;
use crate::queue::{ClaimedJob, JobFate, JobQueue, QueueError, RetryPolicy};

/// Serves a fixed HTTP response to every connection, forever.
pub async fn serve_fixed(response: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    format!("http://{addr}")
}

pub const UP_RESPONSE: &str =
    "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
pub const DOWN_RESPONSE: &str =
    "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// One in-memory implementation of every store trait, mirroring the
/// conditional-update semantics of the Postgres stores.
#[derive(Default)]
pub struct FakeStores {
    monitors: Mutex<HashMap<Uuid, Monitor>>,
    history: Mutex<Vec<(Uuid, String)>>,
    runs: Mutex<HashMap<String, bool>>,
    logs: Mutex<HashMap<(String, &'static str), bool>>,
    prefs: Mutex<HashMap<Uuid, OwnerPreferences>>,
    fail_next_apply: AtomicBool,
}

impl FakeStores {
    pub fn insert_monitor(&self, url: &str, customize: impl FnOnce(&mut Monitor)) -> Uuid {
        let id = Uuid::new_v4();
        let mut monitor = Monitor {
            id,
            owner_id: Uuid::new_v4(),
            name: "test monitor".to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            interval_minutes: 5,
            timeout_ms: 2000,
            assertions: Vec::new(),
            enabled: true,
            last_status: MonitorStatus::Unknown,
            last_response_time_ms: None,
            last_checked_at: None,
            consecutive_fails: 0,
            alert_threshold: 1,
            last_alert_at: None,
        };
        customize(&mut monitor);
        self.monitors.lock().unwrap().insert(id, monitor);
        id
    }

    pub fn monitor(&self, id: Uuid) -> Monitor {
        self.monitors.lock().unwrap().get(&id).unwrap().clone()
    }

    pub fn set_monitor_url(&self, id: Uuid, url: &str) {
        self.monitors.lock().unwrap().get_mut(&id).unwrap().url = url.to_string();
    }

    pub fn set_preferences(&self, monitor_id: Uuid, prefs: OwnerPreferences) {
        self.prefs.lock().unwrap().insert(monitor_id, prefs);
    }

    pub fn history_len(&self, monitor_id: Uuid) -> usize {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == monitor_id)
            .count()
    }

    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    pub fn log_sent(&self, check_run_id: &str, alert_type: AlertType) -> Option<bool> {
        self.logs
            .lock()
            .unwrap()
            .get(&(check_run_id.to_string(), alert_type.as_str()))
            .copied()
    }

    pub fn log_count(&self) -> usize {
        self.logs.lock().unwrap().len()
    }
}

pub fn default_preferences() -> OwnerPreferences {
    OwnerPreferences {
        email: "owner@example.com".to_string(),
        alerts_enabled: true,
        alert_on_down: true,
        alert_on_up: true,
        cooldown_minutes: 10,
    }
}

#[async_trait]
impl MonitorStore for FakeStores {
    async fn get(&self, id: Uuid) -> Result<Option<Monitor>, StoreError> {
        Ok(self.monitors.lock().unwrap().get(&id).cloned())
    }

    async fn apply_check_outcome(
        &self,
        check_run_id: &str,
        monitor_id: Uuid,
        outcome: &ProbeOutcome,
    ) -> Result<AppliedCheck, StoreError> {
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected failure".to_string()));
        }
        let mut monitors = self.monitors.lock().unwrap();
        let monitor = monitors
            .get_mut(&monitor_id)
            .ok_or_else(|| StoreError::Database("monitor vanished".to_string()))?;

        monitor.consecutive_fails = if outcome.ok {
            0
        } else {
            monitor.consecutive_fails + 1
        };
        monitor.last_status = if outcome.ok {
            MonitorStatus::Up
        } else {
            MonitorStatus::Down
        };
        monitor.last_response_time_ms = outcome.response_time_ms;
        monitor.last_checked_at = Some(outcome.checked_at);
        let consecutive_fails = monitor.consecutive_fails;
        drop(monitors);

        self.history
            .lock()
            .unwrap()
            .push((monitor_id, check_run_id.to_string()));
        self.runs
            .lock()
            .unwrap()
            .insert(check_run_id.to_string(), true);

        Ok(AppliedCheck {
            history_id: Uuid::new_v4(),
            consecutive_fails,
        })
    }

    async fn claim_alert_slot(
        &self,
        monitor_id: Uuid,
        cooldown_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertSlot>, StoreError> {
        let mut monitors = self.monitors.lock().unwrap();
        let Some(monitor) = monitors.get_mut(&monitor_id) else {
            return Ok(None);
        };
        let allowed = cooldown_minutes <= 0
            || match monitor.last_alert_at {
                None => true,
                Some(last) => last <= now - ChronoDuration::minutes(cooldown_minutes.into()),
            };
        if allowed {
            monitor.last_alert_at = Some(now);
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
        let mut monitors = self.monitors.lock().unwrap();
        if let Some(monitor) = monitors.get_mut(&monitor_id) {
            if monitor.last_alert_at == Some(slot.claimed_at) {
                monitor.last_alert_at = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CheckRunStore for FakeStores {
    async fn begin(&self, check_run_id: &str, _monitor_id: Uuid) -> Result<RunGate, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        match runs.get(check_run_id) {
            Some(true) => Ok(RunGate::AlreadyProcessed),
            Some(false) => Ok(RunGate::Retry),
            None => {
                runs.insert(check_run_id.to_string(), false);
                Ok(RunGate::Fresh)
            }
        }
    }
}

#[async_trait]
impl NotificationLogStore for FakeStores {
    async fn acquire(
        &self,
        check_run_id: &str,
        alert_type: AlertType,
        _monitor_id: Uuid,
    ) -> Result<LogGate, StoreError> {
        let mut logs = self.logs.lock().unwrap();
        let key = (check_run_id.to_string(), alert_type.as_str());
        match logs.get(&key) {
            Some(true) => Ok(LogGate::AlreadySent),
            Some(false) => Ok(LogGate::RetryUnsent),
            None => {
                logs.insert(key, false);
                Ok(LogGate::Acquired)
            }
        }
    }

    async fn mark_sent(
        &self,
        check_run_id: &str,
        alert_type: AlertType,
        _sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.logs
            .lock()
            .unwrap()
            .insert((check_run_id.to_string(), alert_type.as_str()), true);
        Ok(())
    }
}

#[async_trait]
impl OwnerPreferenceStore for FakeStores {
    async fn for_monitor(
        &self,
        monitor_id: Uuid,
    ) -> Result<Option<OwnerPreferences>, StoreError> {
        Ok(self.prefs.lock().unwrap().get(&monitor_id).cloned())
    }
}

/// Records enqueues; claiming is not simulated.
#[derive(Default)]
pub struct FakeQueue {
    jobs: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeQueue {
    pub fn enqueued(&self, queue: &str) -> Vec<serde_json::Value> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl JobQueue for FakeQueue {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        _policy: &RetryPolicy,
    ) -> Result<Uuid, QueueError> {
        self.jobs
            .lock()
            .unwrap()
            .push((queue.to_string(), payload));
        Ok(Uuid::new_v4())
    }

    async fn enqueue_keyed(
        &self,
        queue: &str,
        _job_key: &str,
        payload: serde_json::Value,
        _policy: &RetryPolicy,
    ) -> Result<Option<Uuid>, QueueError> {
        self.jobs
            .lock()
            .unwrap()
            .push((queue.to_string(), payload));
        Ok(Some(Uuid::new_v4()))
    }

    async fn cancel_keyed(&self, _queue: &str, _job_key: &str) -> Result<u64, QueueError> {
        Ok(0)
    }

    async fn claim(&self, _queue: &str) -> Result<Option<ClaimedJob>, QueueError> {
        Ok(None)
    }

    async fn complete(&self, _job: &ClaimedJob) -> Result<(), QueueError> {
        Ok(())
    }

    async fn fail(&self, _job: &ClaimedJob, _error: &str) -> Result<JobFate, QueueError> {
        Ok(JobFate::Dead)
    }
}

/// Records sends; can be told to fail the next one.
#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<(String, String)>>,
    fail_next: AtomicBool,
}

impl FakeMailer {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, to: &str, email: &OutgoingEmail) -> Result<(), MailerError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(MailerError::Transport("injected transport failure".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), email.subject.clone()));
        Ok(())
    }
}
