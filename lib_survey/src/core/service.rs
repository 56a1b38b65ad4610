//! # Resilient Write Service
//!
//! The single object the HTTP layer talks to. It owns the connection manager,
//! the survey writer and the two keep-alive loops, and gives them one
//! lifecycle:
//!
//! - `start` spawns the connection loop, the warm-up prober and, when a public
//!   address is configured, the self-pinger. It returns immediately; the
//!   process can accept requests before the store is reachable.
//! - `stop` cancels every loop and waits for them to finish.
//!
//! A stopped service can be started again.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connections::store::{ConnectOptions, Durability, StoreConnector};
use crate::core::connection_manager::{ConnectionManager, ConnectionPhase};
use crate::core::retry_policy::{FixedDelay, RetryPolicy};
use crate::core::survey_writer::{SubmitError, SurveyWriter};
use crate::keepalive::{SelfPinger, WarmupProber};
use crate::models::survey::{SurveyRecord, SurveySubmission};

/// Every tunable of the write path, already resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    /// Connection string of the document store.
    pub target: String,
    pub connect: ConnectOptions,
    /// Fixed wait between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Total attempts per write, the first one included.
    pub write_max_retries: u32,
    pub write_retry_delay: Duration,
    pub durability: Durability,
    pub warmup_interval: Duration,
    pub ping_interval: Duration,
    /// Public address for the self-pinger. `None` disables it.
    pub self_ping_url: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            target: "mongodb://localhost:27017".to_string(),
            connect: ConnectOptions::default(),
            reconnect_delay: Duration::from_millis(5000),
            write_max_retries: 3,
            write_retry_delay: Duration::from_millis(1000),
            durability: Durability::default(),
            warmup_interval: Duration::from_secs(300),
            ping_interval: Duration::from_secs(120),
            self_ping_url: None,
        }
    }
}

struct Running {
    shutdown: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

pub struct ResilientWriteService {
    manager: Arc<ConnectionManager>,
    writer: SurveyWriter,
    settings: ServiceSettings,
    running: Mutex<Option<Running>>,
}

impl ResilientWriteService {
    /// Builds the service with the default policies: reconnect forever after
    /// `reconnect_delay`, and make `write_max_retries` write attempts spaced by
    /// `write_retry_delay`.
    pub fn new(connector: Arc<dyn StoreConnector>, settings: ServiceSettings) -> Self {
        let reconnect = Arc::new(FixedDelay::unbounded(settings.reconnect_delay));
        let write = Arc::new(FixedDelay::bounded(
            settings.write_max_retries.max(1),
            settings.write_retry_delay,
        ));
        Self::with_policies(connector, settings, reconnect, write)
    }

    pub fn with_policies(
        connector: Arc<dyn StoreConnector>,
        settings: ServiceSettings,
        reconnect_policy: Arc<dyn RetryPolicy>,
        write_policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(
            connector,
            settings.target.clone(),
            settings.connect.clone(),
            reconnect_policy,
        ));
        let writer = SurveyWriter::new(Arc::clone(&manager), write_policy, settings.durability);
        Self {
            manager,
            writer,
            settings,
            running: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.manager.phase()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    /// Spawns the background tasks. Calling it on a running service does
    /// nothing.
    pub fn start(&self) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running.is_some() {
            warn!("Resilient write service is already running.");
            return;
        }

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::with_capacity(3);

        tasks.push(("connection manager", self.manager.start(shutdown.clone())));

        let prober = WarmupProber::new(Arc::clone(&self.manager), self.settings.warmup_interval);
        let token = shutdown.clone();
        tasks.push((
            "warm-up prober",
            tokio::spawn(async move { prober.run(token).await }),
        ));

        match &self.settings.self_ping_url {
            Some(url) => {
                let pinger = SelfPinger::new(url.clone(), self.settings.ping_interval);
                let token = shutdown.clone();
                tasks.push((
                    "keep-alive pinger",
                    tokio::spawn(async move { pinger.run(token).await }),
                ));
            }
            None => warn!("No public address configured, keep-alive pinger disabled."),
        }

        info!(
            "Resilient write service started with {} background tasks.",
            tasks.len()
        );
        *running = Some(Running { shutdown, tasks });
    }

    /// Cancels the background tasks and waits for each of them to exit.
    pub async fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(Running { shutdown, tasks }) = running else {
            return;
        };

        info!("Stopping resilient write service...");
        shutdown.cancel();
        for (name, task) in tasks {
            if let Err(e) = task.await {
                error!("Background task '{}' ended abnormally: {}", name, e);
            }
        }
        info!("Resilient write service stopped.");
    }

    /// Stores one survey. See `SurveyWriter::submit`.
    pub async fn submit(&self, submission: SurveySubmission) -> Result<SurveyRecord, SubmitError> {
        self.writer.submit(submission).await
    }
}

impl Drop for ResilientWriteService {
    fn drop(&mut self) {
        let running = match self.running.get_mut() {
            Ok(running) => running.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(running) = running {
            running.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::memory_store::MemoryStore;
    use crate::connections::store::{StoreError, SurveyStore};
    use crate::utils::log_capture::CapturedLogs;
    use async_trait::async_trait;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_settings() -> ServiceSettings {
        ServiceSettings {
            target: "memory://".to_string(),
            connect: ConnectOptions {
                server_selection_timeout: Duration::from_millis(50),
                ..ConnectOptions::default()
            },
            reconnect_delay: Duration::from_millis(10),
            write_retry_delay: Duration::from_millis(5),
            warmup_interval: Duration::from_millis(20),
            ..ServiceSettings::default()
        }
    }

    fn submission() -> SurveySubmission {
        SurveySubmission::from_json(&json!({"userName": "Bob", "selectedProjects": [3]})).unwrap()
    }

    #[test]
    fn test_default_settings() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.reconnect_delay, Duration::from_secs(5));
        assert_eq!(settings.write_max_retries, 3);
        assert_eq!(settings.write_retry_delay, Duration::from_secs(1));
        assert_eq!(settings.warmup_interval, Duration::from_secs(300));
        assert_eq!(settings.ping_interval, Duration::from_secs(120));
        assert!(settings.self_ping_url.is_none());
    }

    #[tokio::test]
    async fn test_start_connects_in_background() {
        let store = MemoryStore::new();
        let service = ResilientWriteService::new(Arc::new(store.clone()), fast_settings());
        assert!(!service.is_running());

        service.start();
        assert!(service.is_running());
        assert!(
            service
                .manager()
                .wait_for_phase(ConnectionPhase::Connected, WAIT)
                .await
        );

        let record = service.submit(submission()).await.unwrap();
        assert_eq!(store.records(), vec![record]);

        service.stop().await;
        assert!(!service.is_running());
        assert_eq!(service.phase(), ConnectionPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_start_does_not_wait_for_store() {
        let store = MemoryStore::new();
        store.set_reachable(false);
        let service = ResilientWriteService::new(Arc::new(store.clone()), fast_settings());

        service.start();
        let err = service.submit(submission()).await.unwrap_err();
        assert!(matches!(err, SubmitError::ServiceUnavailable(_)));

        store.set_reachable(true);
        assert!(
            service
                .manager()
                .wait_for_phase(ConnectionPhase::Connected, WAIT)
                .await
        );
        assert!(service.submit(submission()).await.is_ok());

        service.stop().await;
    }

    #[tokio::test]
    async fn test_warmup_runs_under_service() {
        let store = MemoryStore::new();
        let service = ResilientWriteService::new(Arc::new(store.clone()), fast_settings());
        service.start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.probe_count() >= 2);

        service.stop().await;
        let probes = store.probe_count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.probe_count(), probes);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let store = MemoryStore::new();
        let service = ResilientWriteService::new(Arc::new(store.clone()), fast_settings());

        service.start();
        service.start();
        service.stop().await;
        service.stop().await;

        service.start();
        assert!(
            service
                .manager()
                .wait_for_phase(ConnectionPhase::Connected, WAIT)
                .await
        );
        service.stop().await;
        assert!(store.connect_count() >= 1);
    }

    #[tokio::test]
    async fn test_missing_public_address_warns() {
        let (logs, _guard) = CapturedLogs::install();
        let service =
            ResilientWriteService::new(Arc::new(MemoryStore::new()), fast_settings());

        service.start();
        service.stop().await;

        let output = logs.contents();
        let line = output
            .lines()
            .find(|l| l.contains("keep-alive pinger disabled"))
            .unwrap();
        assert!(line.contains("WARN"));
    }

    struct PanickingConnector;

    #[async_trait]
    impl StoreConnector for PanickingConnector {
        async fn connect(
            &self,
            _target: &str,
            _options: &ConnectOptions,
        ) -> Result<Arc<dyn SurveyStore>, StoreError> {
            panic!("driver bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_take_down_service() {
        let service = ResilientWriteService::new(Arc::new(PanickingConnector), fast_settings());

        service.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.is_running());

        tokio::time::timeout(WAIT, service.stop())
            .await
            .expect("stop hung after a task panicked");
        assert!(!service.is_running());
    }
}
