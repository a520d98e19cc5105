use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use upwatch::config::AppConfig;
use upwatch::db;
use upwatch::db::stores::{
    CheckRunStore, MonitorStore, NotificationLogStore, OwnerPreferenceStore, PgCheckRunStore,
    PgMonitorStore, PgNotificationLogStore, PgOwnerPreferenceStore,
};
use upwatch::notifications::{HttpApiMailer, Mailer};
use upwatch::probe::ProbeExecutor;
use upwatch::queue::{JobQueue, PgJobQueue};
use upwatch::scheduler::{self, ScheduleRegistry};
use upwatch::workers::{self, CheckWorker, NotificationWorker};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "upwatch.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    let args = Args::parse();

    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };
    init_logging(&config.log_dir);
    info!("Starting upwatch pipeline.");

    let pool = db::connect(&config.database_url, config.database_max_connections).await?;

    // All coordination handles are built once here and injected; workers own
    // no globals.
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(pool.clone()));
    let monitors: Arc<dyn MonitorStore> = Arc::new(PgMonitorStore::new(pool.clone()));
    let check_runs: Arc<dyn CheckRunStore> = Arc::new(PgCheckRunStore::new(pool.clone()));
    let notification_logs: Arc<dyn NotificationLogStore> =
        Arc::new(PgNotificationLogStore::new(pool.clone()));
    let owners: Arc<dyn OwnerPreferenceStore> = Arc::new(PgOwnerPreferenceStore::new(pool.clone()));
    let mailer: Arc<dyn Mailer> = Arc::new(HttpApiMailer::new(
        config.mailer.endpoint.clone(),
        config.mailer.api_key.clone(),
        config.mailer.from.clone(),
    ));

    let registry = ScheduleRegistry::new(pool.clone(), queue.clone(), config.check_policy());
    if let Err(e) = scheduler::reconcile_schedules(&pool, &registry).await {
        error!(error = %e, "Schedule reconciliation failed; continuing with existing schedules.");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle = tokio::spawn(scheduler::run_scheduler(
        pool.clone(),
        queue.clone(),
        config.check_policy(),
        Duration::from_millis(config.scheduler_tick_ms),
        shutdown_rx.clone(),
    ));

    let check_worker = Arc::new(CheckWorker::new(
        monitors.clone(),
        check_runs,
        queue.clone(),
        ProbeExecutor::new(),
        config.notification_policy(),
    ));
    let mut worker_handles = workers::spawn_pool(
        queue.clone(),
        check_worker,
        config.check_concurrency,
        Duration::from_millis(config.queue_poll_ms),
        shutdown_rx.clone(),
    );

    let notification_worker = Arc::new(NotificationWorker::new(
        monitors,
        owners,
        notification_logs,
        mailer,
    ));
    worker_handles.extend(workers::spawn_pool(
        queue,
        notification_worker,
        config.notification_concurrency,
        Duration::from_millis(config.queue_poll_ms),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received; draining workers.");
    let _ = shutdown_tx.send(true);

    scheduler_handle.await?;
    for handle in worker_handles {
        handle.await?;
    }
    info!("Pipeline stopped.");
    Ok(())
}
