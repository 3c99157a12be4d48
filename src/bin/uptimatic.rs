use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use uptimatic::alerting::TransitionNotifier;
use uptimatic::config::AppConfig;
use uptimatic::db::{self, services::{PgEndpointRepository, PgStatusLogRepository}};
use uptimatic::logging::init_logging;
use uptimatic::monitoring::HttpProber;
use uptimatic::notifications::NotificationService;
use uptimatic::queue::{
    CronScheduler, QueueBackend, RedisQueue, TaskQueue, WorkerPool, WorkerPoolConfig,
};
use uptimatic::tasks::{CheckDispatcher, DueEndpointScanner, Task, TaskHandler};

const DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Consume tasks from the queue
    Worker,
    /// Enqueue recurring scans on the configured schedule
    Scheduler,
    /// Run the worker pool and the scheduler in one process (default)
    All,
    /// Create the database schema and exit
    Migrate,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::All);

    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    let _log_guard = init_logging(&config.log_dir, "uptimatic.log");
    info!(command = ?command, version = env!("CARGO_PKG_VERSION"), "Starting uptimatic.");

    let db_pool = db::connect(&config.database_url, DB_MAX_CONNECTIONS)
        .await
        .inspect_err(|e| error!(error = %e, "Failed to connect to the database."))?;

    if command == Command::Migrate {
        db::apply_schema(&db_pool).await?;
        return Ok(());
    }

    let redis_queue = RedisQueue::new(&config.redis_url, &config.queue_namespace)?;
    redis_queue
        .ping()
        .await
        .inspect_err(|e| error!(error = %e, "Redis is unreachable."))?;
    let backend: Arc<dyn QueueBackend> = Arc::new(redis_queue);
    let queue = Arc::new(TaskQueue::new(backend.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested. Finishing in-flight tasks."),
            Err(e) => error!(error = %e, "Failed to listen for the shutdown signal."),
        }
        let _ = shutdown_tx.send(true);
    });

    let worker = if matches!(command, Command::Worker | Command::All) {
        let endpoints = Arc::new(PgEndpointRepository::new(db_pool.clone()));
        let logs = Arc::new(PgStatusLogRepository::new(db_pool.clone()));
        let prober = Arc::new(HttpProber::new(config.probe_timeout())?);
        let notifier = TransitionNotifier::new(
            queue.clone(),
            config.alert_utc_offset,
            config.logo_url(),
        );
        let notifications = Arc::new(NotificationService::from_config(
            config.mail_webhook_url.as_deref(),
            config.mail_webhook_body_template.clone(),
        )?);

        let handler = Arc::new(TaskHandler::new(
            DueEndpointScanner::new(endpoints.clone(), queue.clone()),
            CheckDispatcher::new(endpoints, logs, prober, notifier, config.check_lease()),
            notifications,
        ));
        let pool = Arc::new(WorkerPool::new(
            backend.clone(),
            WorkerPoolConfig {
                concurrency: config.worker_concurrency,
                task_lease: config.task_lease(),
                ..Default::default()
            },
        ));
        Some(tokio::spawn(pool.run(handler, shutdown_rx.clone())))
    } else {
        None
    };

    let scheduler = if matches!(command, Command::Scheduler | Command::All) {
        let mut scheduler = CronScheduler::new(TaskQueue::new(backend.clone()));
        scheduler.register_schedule(
            &config.scan_schedule,
            config.scan_schedule()?,
            Task::ValidateUptime,
        );
        Some(tokio::spawn(Arc::new(scheduler).run(shutdown_rx.clone())))
    } else {
        None
    };

    for handle in [worker, scheduler].into_iter().flatten() {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task panicked.");
        }
    }

    info!("uptimatic stopped.");
    Ok(())
}
