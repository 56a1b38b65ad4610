//! # External Keep-Alive Pinger
//!
//! Some hosting platforms suspend a process after a stretch without inbound
//! traffic. The pinger defeats that by requesting the service's own public
//! address once at start and then on a fixed interval. It never retries and
//! only logs what happened.

use std::time::Duration;

use reqwest::StatusCode;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::warmup_prober::MIN_INTERVAL;

pub struct SelfPinger {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl SelfPinger {
    /// Creates a pinger for `url`. Each request is bounded by the smaller of
    /// 30 seconds and the ping interval. A zero `interval` is raised to one
    /// millisecond.
    pub fn new(url: impl Into<String>, interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let timeout = interval.min(Duration::from_secs(30));
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .user_agent("server_survey-keepalive/1.0")
                .build()
                .unwrap_or_default(), // Fallback to a default client if builder fails.
            url: url.into(),
            interval,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        // The first tick completes immediately, which gives the ping at start.
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Keep-alive pinger received shutdown signal.");
                    break;
                }
                _ = ticker.tick() => {
                    self.ping_once().await;
                }
            }
        }
    }

    /// Sends one ping. Returns the response status, or `None` if the request
    /// failed.
    pub async fn ping_once(&self) -> Option<StatusCode> {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                let status = response.status();
                info!("Keep-alive ping to {} returned {}", self.url, status);
                Some(status)
            }
            Err(e) => {
                warn!("Keep-alive ping to {} failed: {}", self.url, e);
                None
            }
        }
    }
}
