use std::sync::Arc;

use anyhow::Context;
use charforge_db::store::PgGenerationStore;
use charforge_meshy::MeshyApi;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use charforge_worker::config::WorkerConfig;
use charforge_worker::tracker::JobTracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "charforge_worker=debug,charforge_meshy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        base_url = %config.meshy.base_url,
        ai_model = %config.meshy.ai_model,
        interval_secs = config.tracker.poll_interval.as_secs(),
        max_attempts = config.tracker.max_polling_attempts,
        "Loaded worker configuration",
    );
    if config.meshy.api_key.is_none() {
        tracing::error!("MESHY_API_KEY is not set; provider calls will be skipped");
    }

    // --- Database ---
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;

    let pool = charforge_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    charforge_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    charforge_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Tracker ---
    let store = Arc::new(PgGenerationStore::new(pool.clone()));
    let provider =
        Arc::new(MeshyApi::new(config.meshy.clone()).context("Failed to build HTTP client")?);
    let tracker = JobTracker::new(store, provider, config.tracker.clone());
    tracker.start().await;

    shutdown_signal().await;

    // --- Post-shutdown cleanup ---
    tracker.stop().await;
    pool.close().await;
    tracing::info!("Database pool closed");

    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
