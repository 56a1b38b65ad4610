//! # Survey Submission Server
//!
//! Accepts survey submissions over HTTP and persists them to MongoDB through
//! the `ResilientWriteService`.
//!
//! ## Startup sequence:
//! 1. Load `.env`, then layer defaults, `server_survey.conf` and CLI/env.
//! 2. Install logging (stdout plus a per-run log file).
//! 3. Start the write service. The store connection is established in the
//!    background, so the listener comes up even while the store is down.
//! 4. Serve until SIGINT or SIGTERM, then stop the service's background tasks.

use anyhow::{Context, Result};
use lib_survey::ResilientWriteService;
use lib_survey::connections::db_mongo::MongoConnector;
use servers::survey_logic::config::{self, ConfigSource};
use servers::survey_logic::cors::OriginPolicy;
use servers::survey_logic::{logger, routes, state::AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let (config, source) = config::load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let _log_guard = logger::setup_logging(&log_dir, &log_level)?;

    match &source {
        ConfigSource::File(path) => info!("Loaded config file {}", path.display()),
        ConfigSource::Missing(path) => info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        ),
        ConfigSource::Unreadable(path, e) => warn!(
            "Failed to load config file {}: {}. Falling back to other sources.",
            path.display(),
            e
        ),
    }
    info!("Configuration: {}", config.summary());

    let settings = config.service_settings()?;
    let origins = OriginPolicy::new(
        config.cors_origins.clone().unwrap_or_default(),
        config.cors_preview_pattern.as_deref(),
    )
    .context("invalid CORS preview pattern")?;

    let service = Arc::new(ResilientWriteService::new(
        Arc::new(MongoConnector::new()),
        settings,
    ));
    service.start();

    let app = routes::router(AppState::new(Arc::clone(&service)), origins.layer());

    let port = config.port.unwrap_or(3001);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server running on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.stop().await;
    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}
