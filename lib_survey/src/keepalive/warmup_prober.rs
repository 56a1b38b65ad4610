//! # Warm-up Prober
//!
//! Keeps the store's connection pool hot between real writes. On every tick
//! it borrows the manager's current handle, runs a lookup that matches zero or
//! more records, and throws the result away. The first probe happens one full
//! interval after start.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connections::store::StoreError;
use crate::core::connection_manager::ConnectionManager;

/// Shortest tick the timer accepts.
pub(crate) const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct WarmupProber {
    manager: Arc<ConnectionManager>,
    interval: Duration,
}

impl WarmupProber {
    /// Creates a prober. A zero `interval` is raised to one millisecond.
    pub fn new(manager: Arc<ConnectionManager>, interval: Duration) -> Self {
        Self {
            manager,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Warm-up prober received shutdown signal.");
                    break;
                }
                _ = ticker.tick() => {
                    // Failures are already logged inside.
                    let _ = self.probe_once().await;
                }
            }
        }
    }

    /// Runs a single probe and logs its outcome.
    pub async fn probe_once(&self) -> Result<(), StoreError> {
        let result = match self.manager.handle() {
            Some(store) => store.probe().await,
            None => Err(StoreError::Unavailable(
                "no live connection to probe".to_string(),
            )),
        };

        match &result {
            Ok(()) => debug!("Warm-up probe completed"),
            Err(e) => warn!("Warm-up probe failed: {}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::memory_store::MemoryStore;
    use crate::connections::store::ConnectOptions;
    use crate::core::connection_manager::ConnectionPhase;
    use crate::core::retry_policy::FixedDelay;

    async fn connected(store: &MemoryStore, shutdown: &CancellationToken) -> Arc<ConnectionManager> {
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(store.clone()),
            "memory://",
            ConnectOptions::default(),
            Arc::new(FixedDelay::unbounded(Duration::from_millis(5))),
        ));
        manager.start(shutdown.clone());
        assert!(
            manager
                .wait_for_phase(ConnectionPhase::Connected, Duration::from_secs(1))
                .await
        );
        manager
    }

    #[tokio::test]
    async fn test_probes_on_interval() {
        let store = MemoryStore::new();
        let shutdown = CancellationToken::new();
        let manager = connected(&store, &shutdown).await;
        let prober = WarmupProber::new(manager, Duration::from_millis(10));

        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { prober.run(shutdown).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert!(store.probe_count() >= 3);
    }

    #[tokio::test]
    async fn test_failing_probe_is_absorbed() {
        let store = MemoryStore::new();
        let shutdown = CancellationToken::new();
        let manager = connected(&store, &shutdown).await;
        store.set_probe_failing(true);
        let prober = WarmupProber::new(Arc::clone(&manager), Duration::from_millis(5));

        assert!(prober.probe_once().await.is_err());

        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { prober.run(shutdown).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        assert_eq!(manager.phase(), ConnectionPhase::Connected);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_without_connection_fails_quietly() {
        let store = MemoryStore::new();
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(store.clone()),
            "memory://",
            ConnectOptions::default(),
            Arc::new(FixedDelay::unbounded(Duration::ZERO)),
        ));
        let prober = WarmupProber::new(manager, Duration::from_secs(300));

        let err = prober.probe_once().await.unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(store.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_does_not_panic() {
        let store = MemoryStore::new();
        let shutdown = CancellationToken::new();
        let manager = connected(&store, &shutdown).await;
        let prober = WarmupProber::new(manager, Duration::ZERO);

        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { prober.run(shutdown).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        shutdown.cancel();
        task.await.unwrap();
        assert!(store.probe_count() >= 1);
    }
}
