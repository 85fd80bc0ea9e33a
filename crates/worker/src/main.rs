use std::sync::Arc;
use std::time::Duration;

use curbside_common::config::AppConfig;
use curbside_common::geo::Haversine;
use curbside_common::{db, redis_pool};
use curbside_engine::clock::SystemClock;
use curbside_engine::lock::RedisChainLock;
use curbside_engine::reporter::TracingReporter;
use curbside_engine::repository::PgScanRepository;
use curbside_engine::runner::{LockMode, RunnerSettings, ScanServices};
use curbside_notifier::{LogChannel, NotificationChannel, TwilioConfig, TwilioSmsChannel};
use curbside_scanners::ScannerRegistry;
use curbside_worker::dispatcher::ScanDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curbside_worker=info,curbside_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Curbside worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;

    let scanners = ScannerRegistry::from_endpoints(&config.scanner_endpoints)?;
    if scanners.is_empty() {
        tracing::warn!("No SCANNER_ENDPOINTS configured, every chain scan will fail");
    }

    let channel: Arc<dyn NotificationChannel> = match TwilioConfig::from_app_config(&config) {
        Some(twilio) => Arc::new(TwilioSmsChannel::new(twilio)?),
        None => {
            tracing::warn!("Twilio not configured, notifications will only be logged");
            Arc::new(LogChannel)
        }
    };

    tracing::info!(channel = channel.name(), "Notification channel ready");

    let settings = RunnerSettings::from_config(&config);
    if settings.lock_mode == LockMode::Bypass {
        tracing::warn!(app_env = %config.app_env, "Chain scan lock disabled");
    }

    let services = Arc::new(ScanServices {
        repository: Arc::new(PgScanRepository::new(pool)),
        lock: Arc::new(RedisChainLock::new(redis)),
        scanners: Arc::new(scanners),
        channel,
        reporter: Arc::new(TracingReporter),
        clock: Arc::new(SystemClock),
        distance: Arc::new(Haversine),
        settings,
    });

    let mut dispatcher = ScanDispatcher::new(
        services,
        Duration::from_secs(config.scan_interval_secs),
        config.scan_max_workers,
    );

    tracing::info!(
        hostname = %config.hostname,
        "Starting scan dispatcher"
    );

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = dispatcher.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scan dispatcher exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, waiting for running scans...");
        }
    }

    dispatcher.drain().await;

    tracing::info!("Curbside worker stopped.");
    Ok(())
}
