//! # End-to-End Test Harness
//!
//! Runs the real survey router on `127.0.0.1:0` in front of an in-memory
//! store, so tests can talk to it over HTTP with `reqwest` while scripting
//! store failures.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lib_survey::connections::memory_store::MemoryStore;
use lib_survey::{ConnectOptions, ConnectionPhase, ResilientWriteService, ServiceSettings};
use servers::survey_logic::config::{DEFAULT_CORS_ORIGINS, DEFAULT_CORS_PREVIEW_PATTERN};
use servers::survey_logic::cors::OriginPolicy;
use servers::survey_logic::routes;
use servers::survey_logic::state::AppState;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Settings with millisecond delays. Warm-up and pinging are effectively off.
pub fn fast_settings() -> ServiceSettings {
    ServiceSettings {
        target: "memory://".to_string(),
        connect: ConnectOptions {
            server_selection_timeout: Duration::from_millis(100),
            ..ConnectOptions::default()
        },
        reconnect_delay: Duration::from_millis(20),
        write_max_retries: 3,
        write_retry_delay: Duration::from_millis(20),
        warmup_interval: Duration::from_secs(3600),
        ping_interval: Duration::from_secs(3600),
        ..ServiceSettings::default()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: MemoryStore,
    pub service: Arc<ResilientWriteService>,
    stop_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Starts the service and the HTTP listener. Does not wait for the store.
    pub async fn spawn(store: MemoryStore, settings: ServiceSettings) -> anyhow::Result<Self> {
        let service = Arc::new(ResilientWriteService::new(
            Arc::new(store.clone()),
            settings,
        ));
        service.start();

        let cors = OriginPolicy::new(
            DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect(),
            Some(DEFAULT_CORS_PREVIEW_PATTERN),
        )?
        .layer();
        let app = routes::router(AppState::new(Arc::clone(&service)), cors);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await;
        });

        Ok(Self {
            addr,
            store,
            service,
            stop_tx: Some(stop_tx),
            server: Some(server),
        })
    }

    /// Starts the server and waits until the store connection is up.
    pub async fn spawn_connected(store: MemoryStore, settings: ServiceSettings) -> anyhow::Result<Self> {
        let server = Self::spawn(store, settings).await?;
        if !server
            .service
            .manager()
            .wait_for_phase(ConnectionPhase::Connected, Duration::from_secs(2))
            .await
        {
            anyhow::bail!("store connection was not established");
        }
        Ok(server)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
        self.service.stop().await;
    }
}
