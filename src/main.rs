use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use therapydesk::api::{auth::ensure_admin_user, create_router, metrics::init_metrics, rate_limit};
use therapydesk::config::Config;
use therapydesk::engine::spawn_payment_cycle_task;
use therapydesk::AppState;

#[derive(Parser, Debug)]
#[command(name = "therapydesk")]
#[command(author, version, about = "Therapist directory, booking and commission tracking", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "therapydesk.toml", env = "THERAPYDESK_CONFIG")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TherapyDesk v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = init_metrics()?;

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;

    let db_url = config.database.resolved_url(&config.server.data_dir);
    let db = therapydesk::db::connect(&db_url, config.database.max_connections).await?;

    ensure_admin_user(&db, &config).await?;

    if config.scheduler.signing_keys().is_empty() {
        tracing::warn!("No scheduler signing keys configured; payment notification callbacks will be rejected");
    }

    let state = Arc::new(AppState::new(config.clone(), db.clone()).with_metrics(metrics_handle));

    rate_limit::spawn_cleanup_task(state.rate_limiter.clone(), config.rate_limit.cleanup_interval);

    spawn_payment_cycle_task(db.clone(), config.payments.clone(), state.notifier());

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
