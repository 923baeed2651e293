use clap::Parser;
use panel_core::backup::{BackupManager, BackupSettings};
use panel_core::config::{encryption_secret_from_env, Config};
use panel_core::crypto::{mask_for_display, EncryptionCodec};
use panel_core::scheduler::{standing_tasks, Scheduler, StandingServices};
use panel_core::ssl::{CertificateLifecycleManager, CertificateSettings};
use panel_core::utils::logger;
use panel_core::{Clock, ProcessRunner, SystemClock, TokioProcessRunner};
use panel_daemon::db::connection::{close_pool, create_pool};
use panel_daemon::db::migrate::migrate;
use panel_daemon::services::health::DatabaseHealthProbe;
use panel_daemon::store::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "panel-orchestrator")]
#[command(about = "Runs certificate renewal, backups and health checks in the background")]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overrides config)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .with_env_overrides()?;
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    logger::init(&config.log.level, &config.log.format)?;
    tracing::info!("Starting panel orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let codec = Arc::new(EncryptionCodec::new(encryption_secret_from_env()?)?);

    // Initialize database
    let pool = create_pool(&config.store.sqlite_path)?;
    migrate(&pool)?;
    let store = SqliteStore::new(pool.clone());

    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if config.database.url.is_empty() {
        tracing::warn!("DATABASE_URL is not set; database backups will fail");
    } else {
        tracing::info!(
            database_url = %mask_for_display(&config.database.url, 12),
            "Database backups enabled"
        );
    }

    let backups = Arc::new(BackupManager::new(
        BackupSettings::from_config(&config),
        runner.clone(),
        Arc::new(store.clone()),
        clock.clone(),
    ));
    backups.initialize().await?;

    let certificates = Arc::new(CertificateLifecycleManager::new(
        CertificateSettings::from_config(&config),
        runner,
        codec,
        Arc::new(store.clone()),
        clock.clone(),
    ));
    if let Err(e) = certificates.ensure_client_installed().await {
        tracing::warn!("Certificate renewal will fail until the ACME client is installed: {}", e);
    }

    let scheduler = Scheduler::new(clock);
    let services = StandingServices {
        health: Arc::new(DatabaseHealthProbe::new(store, backups.clone())),
        certificates,
        backups,
    };
    for task in standing_tasks(services, &config.schedule) {
        scheduler.register(task);
    }
    scheduler.start();

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    scheduler.stop();
    close_pool(&pool);
    tracing::info!("Orchestrator stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
